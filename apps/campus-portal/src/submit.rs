//! Escritas de formulário e avisos exibidos ao usuário
//!
//! O [`Submitter`] faz exatamente uma escrita por envio e não toca no estado
//! das telas: a mudança chega às consultas ao vivo pelo feed do banco.

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use campus_db::{Caller, CollectionRef, DbError, DocRef, DocumentStore, SetMode};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::diagnostics::{PermissionErrorEvent, PermissionErrorReporter};
use crate::error::{PortalError, Reply};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastVariant {
    Default,
    Destructive,
}

/// Aviso curto exibido após um envio
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub title: String,
    pub description: String,
    pub variant: ToastVariant,
}

impl Toast {
    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant: ToastVariant::Default,
        }
    }

    pub fn destructive(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant: ToastVariant::Destructive,
        }
    }
}

/// Textos de falha de uma ação
#[derive(Debug, Clone, Copy)]
pub struct FailureCopy {
    pub title: &'static str,
    /// Mostrado em negações de acesso
    pub permission: &'static str,
    /// Mostrado em falhas internas
    pub fallback: &'static str,
}

impl FailureCopy {
    /// Validação aparece por campo, sem aviso
    pub fn toast_for(&self, error: &PortalError) -> Option<Toast> {
        let description = match error {
            PortalError::Validation(_) => return None,
            PortalError::PermissionDenied { .. } => self.permission.to_string(),
            PortalError::Upstream(message) => message.clone(),
            PortalError::Unauthenticated(message) => message.clone(),
            PortalError::NotFound(_) | PortalError::Internal(_) => self.fallback.to_string(),
        };
        Some(Toast::destructive(self.title, description))
    }
}

/// Resultado de uma ação com no máximo um aviso
#[derive(Debug)]
pub struct Submission<T> {
    pub result: Result<T, PortalError>,
    pub toast: Option<Toast>,
}

impl<T> Submission<T> {
    pub fn complete(
        result: Result<T, PortalError>,
        success: impl FnOnce(&T) -> Toast,
        failure: FailureCopy,
    ) -> Self {
        let toast = match &result {
            Ok(value) => Some(success(value)),
            Err(err) => failure.toast_for(err),
        };
        Self { result, toast }
    }

    /// Aviso só em caso de falha (ex.: envio de foto)
    pub fn failure_only(result: Result<T, PortalError>, failure: FailureCopy) -> Self {
        let toast = result.as_ref().err().and_then(|err| failure.toast_for(err));
        Self { result, toast }
    }

    /// Resultado sem aviso (ex.: conversa do assistente)
    pub fn silent(result: Result<T, PortalError>) -> Self {
        Self {
            result,
            toast: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Serialize)]
struct SubmissionBody<T> {
    #[serde(flatten)]
    reply: Reply<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    toast: Option<Toast>,
}

impl<T: Serialize> IntoResponse for Submission<T> {
    fn into_response(self) -> Response {
        match self.result {
            Ok(value) => Json(SubmissionBody {
                reply: Reply::ok(value),
                toast: self.toast,
            })
            .into_response(),
            Err(err) => {
                let status = err.status();
                let body = SubmissionBody::<T> {
                    reply: err.into(),
                    toast: self.toast,
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

/// Escritor único de documentos vindos de formulários
#[derive(Debug, Clone)]
pub struct Submitter {
    store: DocumentStore,
    reporter: PermissionErrorReporter,
}

impl Submitter {
    pub fn new(store: DocumentStore, reporter: PermissionErrorReporter) -> Self {
        Self { store, reporter }
    }

    /// Inclui um documento com id gerado
    pub async fn create<P: Serialize>(
        &self,
        caller: &Caller,
        collection: &CollectionRef,
        payload: &P,
    ) -> Result<DocRef, PortalError> {
        let data = to_document(payload)?;
        match self.store.add(Some(caller), collection, data.clone()).await {
            Ok(doc) => {
                debug!("Documento criado: {}", doc);
                Ok(doc)
            }
            Err(err) => Err(self.relay(err, data)),
        }
    }

    /// Cria o documento se ausente; senão altera só os campos enviados
    pub async fn merge<P: Serialize>(
        &self,
        caller: &Caller,
        doc: &DocRef,
        payload: &P,
    ) -> Result<(), PortalError> {
        let data = to_document(payload)?;
        self.store
            .set(Some(caller), doc, data.clone(), SetMode::Merge)
            .await
            .map_err(|err| self.relay(err, data))
    }

    /// Altera um único campo de um documento existente
    pub async fn patch_field<V: Serialize>(
        &self,
        caller: &Caller,
        doc: &DocRef,
        field: &str,
        value: V,
    ) -> Result<(), PortalError> {
        let value = serde_json::to_value(value)
            .map_err(|e| PortalError::Internal(format!("valor não serializável: {e}")))?;
        let mut patch = Map::new();
        patch.insert(field.to_string(), value);
        let patch = Value::Object(patch);

        self.store
            .update(Some(caller), doc, patch.clone())
            .await
            .map_err(|err| self.relay(err, patch))
    }

    /// Republica negações no canal de diagnóstico e converte o erro
    fn relay(&self, err: DbError, attempted: Value) -> PortalError {
        match &err {
            DbError::PermissionDenied { path, operation } => {
                self.reporter.report(PermissionErrorEvent::new(
                    path.as_str(),
                    *operation,
                    Some(attempted),
                ));
            }
            DbError::NotFound(_) | DbError::InvalidArgument(_) | DbError::InvalidPath(_) => {}
            other => error!("Falha ao gravar documento: {}", other),
        }
        err.into()
    }
}

fn to_document<P: Serialize>(payload: &P) -> Result<Value, PortalError> {
    serde_json::to_value(payload)
        .map_err(|e| PortalError::Internal(format!("payload não serializável: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_db::{testing::temp_store, Operation};
    use serde_json::json;

    const COPY: FailureCopy = FailureCopy {
        title: "Submission Error",
        permission: "Could not save your rating due to a permission issue.",
        fallback: "An unexpected error occurred.",
    };

    #[tokio::test]
    async fn test_denied_create_reports_once_with_payload() -> anyhow::Result<()> {
        let (_dir, store) = temp_store().await?;
        let reporter = PermissionErrorReporter::new();
        let mut diagnostics = reporter.subscribe();
        let submitter = Submitter::new(store, reporter);

        // Dono do documento diferente de quem grava
        let payload = json!({"studentId": "someone-else", "foodQualityRating": 4});
        let result = submitter
            .create(
                &Caller::new("s1"),
                &CollectionRef::mess_food_ratings(),
                &payload,
            )
            .await;

        let submission = Submission::complete(result, |_| Toast::success("ok", "ok"), COPY);
        assert!(matches!(
            submission.result,
            Err(PortalError::PermissionDenied { .. })
        ));
        assert_eq!(
            submission.toast,
            Some(Toast::destructive(COPY.title, COPY.permission))
        );

        let event = diagnostics.recv().await?;
        assert_eq!(event.operation, Operation::Create);
        assert!(event.path.starts_with("messFoodRatings/"));
        assert_eq!(event.request_resource_data, Some(payload));
        assert!(diagnostics.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_patch_field_on_missing_document() -> anyhow::Result<()> {
        let (_dir, store) = temp_store().await?;
        store.grant_admin("admin").await?;
        let reporter = PermissionErrorReporter::new();
        let mut diagnostics = reporter.subscribe();
        let submitter = Submitter::new(store, reporter);
        let missing = CollectionRef::appointments().doc("missing");

        let err = submitter
            .patch_field(&Caller::new("admin"), &missing, "status", "cancelled")
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::NotFound(_)));
        assert!(diagnostics.try_recv().is_err());

        // Sem acesso, a ausência não é revelada
        let err = submitter
            .patch_field(&Caller::new("s1"), &missing, "status", "cancelled")
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::PermissionDenied { .. }));
        let event = diagnostics.recv().await?;
        assert_eq!(event.operation, Operation::Update);
        assert_eq!(event.path, "appointments/missing");
        assert_eq!(event.request_resource_data, Some(json!({"status": "cancelled"})));
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_keeps_untouched_fields() -> anyhow::Result<()> {
        let (_dir, store) = temp_store().await?;
        let submitter = Submitter::new(store.clone(), PermissionErrorReporter::new());
        let caller = Caller::new("s1");
        let doc = DocRef::user_profile("s1");

        submitter
            .merge(&caller, &doc, &json!({"uid": "s1", "hostel": "Gargi"}))
            .await?;
        submitter
            .merge(&caller, &doc, &json!({"department": "Physics"}))
            .await?;

        let stored = store.get(Some(&caller), &doc).await?.expect("perfil salvo");
        assert_eq!(stored.data["hostel"], "Gargi");
        assert_eq!(stored.data["department"], "Physics");
        Ok(())
    }

    #[test]
    fn test_validation_failure_has_no_toast() {
        let submission: Submission<()> = Submission::complete(
            Err(PortalError::invalid_field("messName", "required")),
            |_| Toast::success("ok", "ok"),
            COPY,
        );
        assert!(submission.toast.is_none());
    }

    #[test]
    fn test_upstream_message_forwarded_verbatim() {
        let toast = COPY
            .toast_for(&PortalError::Upstream("quota exceeded".into()))
            .unwrap();
        assert_eq!(toast.description, "quota exceeded");
        assert_eq!(toast.variant, ToastVariant::Destructive);
    }
}
