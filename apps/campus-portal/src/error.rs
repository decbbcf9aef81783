//! Tipo de erro único do portal e envelope de resposta `{ok} | {error, detail}`

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use campus_db::{DbError, Operation};
use serde::Serialize;
use thiserror::Error;

/// Mensagens de validação por campo
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Classificação exposta ao cliente
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    Validation,
    Upstream,
    NotFound,
    Unauthenticated,
    Internal,
}

#[derive(Error, Debug, Clone)]
pub enum PortalError {
    #[error("Permissão negada: {operation} em {path}")]
    PermissionDenied { path: String, operation: Operation },

    #[error("Dados inválidos: {}", summarize(.0))]
    Validation(FieldErrors),

    /// Mensagem do serviço externo, repassada sem alteração
    #[error("{0}")]
    Upstream(String),

    #[error("Não encontrado: {0}")]
    NotFound(String),

    #[error("Autenticação necessária: {0}")]
    Unauthenticated(String),

    #[error("Erro interno: {0}")]
    Internal(String),
}

fn summarize(fields: &FieldErrors) -> String {
    fields.keys().cloned().collect::<Vec<_>>().join(", ")
}

impl PortalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PortalError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            PortalError::Validation(_) => ErrorKind::Validation,
            PortalError::Upstream(_) => ErrorKind::Upstream,
            PortalError::NotFound(_) => ErrorKind::NotFound,
            PortalError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            PortalError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Erro de validação de um único campo
    pub fn invalid_field(field: &str, message: &str) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.to_string(), vec![message.to_string()]);
        PortalError::Validation(fields)
    }

    pub(crate) fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DbError> for PortalError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::PermissionDenied { path, operation } => {
                PortalError::PermissionDenied { path, operation }
            }
            DbError::NotFound(what) => PortalError::NotFound(what),
            DbError::InvalidArgument(msg) | DbError::InvalidPath(msg) => {
                PortalError::invalid_field("document", &msg)
            }
            other => PortalError::Internal(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for PortalError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields = FieldErrors::new();
        for (field, errs) in errors.field_errors() {
            let messages = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            fields.insert(field.to_string(), messages);
        }
        PortalError::Validation(fields)
    }
}

/// Envelope de todas as respostas HTTP
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Reply<T> {
    Ok {
        ok: T,
    },
    Error {
        error: ErrorKind,
        detail: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        fields: Option<FieldErrors>,
    },
}

impl<T> Reply<T> {
    pub fn ok(value: T) -> Self {
        Reply::Ok { ok: value }
    }
}

impl<T> From<Result<T, PortalError>> for Reply<T> {
    fn from(result: Result<T, PortalError>) -> Self {
        match result {
            Ok(value) => Reply::ok(value),
            Err(err) => err.into(),
        }
    }
}

impl<T> From<PortalError> for Reply<T> {
    fn from(err: PortalError) -> Self {
        let fields = match &err {
            PortalError::Validation(fields) => Some(fields.clone()),
            _ => None,
        };
        Reply::Error {
            error: err.kind(),
            detail: err.to_string(),
            fields,
        }
    }
}

impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(Reply::<()>::from(self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_db_denial_maps_to_permission_kind() {
        let err = PortalError::from(DbError::PermissionDenied {
            path: "appointments".into(),
            operation: Operation::List,
        });
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_reply_wire_shape() {
        let ok = serde_json::to_value(Reply::ok(48u32)).unwrap();
        assert_eq!(ok, json!({"ok": 48}));

        let err: Reply<u32> = PortalError::Upstream("quota exceeded".into()).into();
        let value = serde_json::to_value(err).unwrap();
        assert_eq!(value, json!({"error": "upstream", "detail": "quota exceeded"}));
    }

    #[test]
    fn test_validation_reply_lists_fields() {
        let err: Reply<()> = PortalError::invalid_field("reason", "too short").into();
        let value = serde_json::to_value(err).unwrap();
        assert_eq!(value["error"], "validation");
        assert_eq!(value["fields"]["reason"][0], "too short");
    }
}
