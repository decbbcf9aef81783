//! Contexto do portal: banco, autenticação, armazenamento e assistente
//!
//! Construído uma vez em [`PortalContext::init`] e compartilhado como estado
//! do axum. [`PortalContext::shutdown`] encerra o ouvinte de diagnóstico e o
//! pool.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use campus_db::{
    init_db_pool, Caller, CollectionRef, DbError, DocRef, DocumentStore, Operation, Query,
};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::assistant::{GeminiAssistant, HealthAssistant};
use crate::auth::{AuthProvider, LogCodeSender};
use crate::binder::{BoundCollection, BoundDocument, Record};
use crate::config::PortalConfig;
use crate::diagnostics::{PermissionErrorEvent, PermissionErrorReporter};
use crate::error::PortalError;
use crate::storage::{LocalObjectStorage, ObjectStorage};
use crate::submit::Submitter;

pub type SharedContext = Arc<PortalContext>;

pub struct PortalContext {
    pub store: DocumentStore,
    pub auth: AuthProvider,
    pub storage: Arc<dyn ObjectStorage>,
    pub assistant: Arc<dyn HealthAssistant>,
    pub reporter: PermissionErrorReporter,
    pub submitter: Submitter,
    dev_overlay: bool,
    dev_listener: Mutex<Option<JoinHandle<()>>>,
}

impl PortalContext {
    pub async fn init(config: &PortalConfig) -> Result<Self> {
        let pool = init_db_pool(&config.db)
            .await
            .context("Falha ao inicializar banco de dados")?;
        let store = DocumentStore::new(pool.clone());

        for uid in &config.admin_uids {
            store
                .grant_admin(uid)
                .await
                .with_context(|| format!("Falha ao conceder administrador a {uid}"))?;
            info!("Administrador provisionado: {}", uid);
        }

        let auth = AuthProvider::new(
            pool,
            &config.jwt_secret,
            config.session_ttl_secs,
            &config.otp_secret,
            Arc::new(LogCodeSender),
        );

        let storage = LocalObjectStorage::open(
            &config.upload_dir,
            &config.public_base_url,
            config.max_upload_bytes,
        )
        .await
        .context("Falha ao preparar diretório de uploads")?;

        let assistant =
            GeminiAssistant::new(&config.assistant).context("Falha ao criar cliente de IA")?;

        Ok(Self::from_parts(
            store,
            auth,
            Arc::new(storage),
            Arc::new(assistant),
            config.dev_overlay,
        ))
    }

    /// Monta o contexto a partir de componentes já criados
    pub fn from_parts(
        store: DocumentStore,
        auth: AuthProvider,
        storage: Arc<dyn ObjectStorage>,
        assistant: Arc<dyn HealthAssistant>,
        dev_overlay: bool,
    ) -> Self {
        let reporter = PermissionErrorReporter::new();
        let dev_listener = dev_overlay.then(|| reporter.spawn_dev_listener());
        if dev_overlay {
            info!("Overlay de diagnóstico de permissões ativo");
        }

        Self {
            submitter: Submitter::new(store.clone(), reporter.clone()),
            store,
            auth,
            storage,
            assistant,
            reporter,
            dev_overlay,
            dev_listener: Mutex::new(dev_listener),
        }
    }

    pub fn dev_overlay(&self) -> bool {
        self.dev_overlay
    }

    pub fn collection<T>(&self, collection: CollectionRef) -> BoundCollection<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        BoundCollection::new(self.store.clone(), self.reporter.clone(), collection)
    }

    pub fn document<T>(&self, doc: DocRef) -> BoundDocument<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        BoundDocument::new(self.store.clone(), self.reporter.clone(), doc)
    }

    /// Leitura pontual de um documento tipado
    pub async fn read_document<T: DeserializeOwned>(
        &self,
        caller: &Caller,
        doc: &DocRef,
    ) -> Result<Option<T>, PortalError> {
        let found = self
            .store
            .get(Some(caller), doc)
            .await
            .map_err(|e| self.relay_read(e, Operation::Get))?;
        found.map(|d| d.decode::<T>()).transpose().map_err(Into::into)
    }

    /// Leitura pontual de uma consulta; documentos ilegíveis são ignorados
    pub async fn read_collection<T: DeserializeOwned>(
        &self,
        caller: &Caller,
        query: &Query,
    ) -> Result<Vec<Record<T>>, PortalError> {
        let documents = self
            .store
            .query(Some(caller), query)
            .await
            .map_err(|e| self.relay_read(e, Operation::List))?;

        Ok(documents
            .into_iter()
            .filter_map(|doc| match doc.decode::<T>() {
                Ok(data) => Some(Record { id: doc.id, data }),
                Err(e) => {
                    warn!("Documento {} ignorado: {}", doc.path, e);
                    None
                }
            })
            .collect())
    }

    pub async fn is_admin(&self, identity_uid: &str) -> Result<bool, PortalError> {
        Ok(self.store.is_admin(identity_uid).await?)
    }

    fn relay_read(&self, err: DbError, operation: Operation) -> PortalError {
        if let DbError::PermissionDenied { path, .. } = &err {
            self.reporter
                .report(PermissionErrorEvent::new(path.as_str(), operation, None));
        }
        err.into()
    }

    pub async fn shutdown(&self) {
        let listener = match self.dev_listener.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = listener {
            handle.abort();
        }
        self.store.close().await;
        info!("Contexto do portal encerrado");
    }
}
