//! Armazenamento de documentos JSON com regras de acesso e feed de mudanças
//!
//! Cada escrita confirmada publica um [`ChangeEvent`] num canal broadcast;
//! consultas ao vivo usam esse feed para reexecutar suas consultas.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DbError;
use crate::path::{CollectionRef, DocRef};
use crate::query::Query;
use crate::rules::{self, Caller, Operation, RuleContext};

/// Capacidade do canal de mudanças antes de um receptor ficar defasado
const CHANGE_FEED_CAPACITY: usize = 256;

/// Documento lido do banco
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub path: String,
    pub data: Value,
}

impl Document {
    /// Converte os dados para o tipo do registro
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DbError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Modo de escrita de `set`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Substitui o documento inteiro
    Overwrite,
    /// Cria se ausente; caso contrário altera só os campos informados
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Notificação de escrita confirmada
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Caminho da coleção afetada
    pub collection: String,
    /// Caminho do documento afetado
    pub path: String,
    pub kind: ChangeKind,
}

/// Banco de documentos sobre SQLite
#[derive(Debug, Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
    changes: broadcast::Sender<ChangeEvent>,
    /// Serializa leitura-mescla-escrita entre clones do mesmo banco
    write_lock: Arc<Mutex<()>>,
}

fn ensure_object(data: &Value) -> Result<(), DbError> {
    if data.is_object() {
        Ok(())
    } else {
        Err(DbError::InvalidArgument(
            "os dados de um documento devem ser um objeto JSON".to_string(),
        ))
    }
}

/// Mescla `patch` em `target`, descendo em objetos aninhados
fn merge_into(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_into(existing, value)
                    }
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

impl DocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            pool,
            changes,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Novo receptor do feed de mudanças
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// Fecha o pool; operações posteriores falham com erro de conexão
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Verifica a existência de `roles_admin/{uid}` sem passar pelas regras
    pub async fn is_admin(&self, uid: &str) -> Result<bool, DbError> {
        Ok(self.load(&DocRef::admin_role(uid).path()).await?.is_some())
    }

    /// Concede o papel de administrador (operação privilegiada de provisionamento)
    pub async fn grant_admin(&self, uid: &str) -> Result<(), DbError> {
        let doc = DocRef::admin_role(uid);
        self.write(&doc, &json!({ "grantedAt": Utc::now() })).await?;
        self.publish(&doc, ChangeKind::Created);
        Ok(())
    }

    pub async fn get(
        &self,
        caller: Option<&Caller>,
        doc: &DocRef,
    ) -> Result<Option<Document>, DbError> {
        let existing = self.load(&doc.path()).await?;
        self.authorize(caller, Operation::Get, doc.segments(), existing.as_ref(), None, None)
            .await?;

        Ok(existing.map(|data| Document {
            id: doc.id().to_string(),
            path: doc.path(),
            data,
        }))
    }

    pub async fn query(
        &self,
        caller: Option<&Caller>,
        query: &Query,
    ) -> Result<Vec<Document>, DbError> {
        self.authorize(
            caller,
            Operation::List,
            query.collection.segments(),
            None,
            None,
            Some(query),
        )
        .await?;

        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT doc_id, path, data FROM documents WHERE collection = ?",
        )
        .bind(query.collection.path())
        .fetch_all(&self.pool)
        .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for (id, path, raw) in rows {
            match serde_json::from_str(&raw) {
                Ok(data) => documents.push(Document { id, path, data }),
                Err(e) => warn!("Documento {} com JSON inválido ignorado: {}", path, e),
            }
        }

        Ok(query.apply(documents))
    }

    /// Cria um documento com id gerado
    pub async fn add(
        &self,
        caller: Option<&Caller>,
        collection: &CollectionRef,
        data: Value,
    ) -> Result<DocRef, DbError> {
        ensure_object(&data)?;
        let doc = collection.doc(&Uuid::new_v4().simple().to_string());

        self.authorize(caller, Operation::Create, doc.segments(), None, Some(&data), None)
            .await?;

        self.write(&doc, &data).await?;
        self.publish(&doc, ChangeKind::Created);
        Ok(doc)
    }

    /// Escreve um documento com id conhecido
    pub async fn set(
        &self,
        caller: Option<&Caller>,
        doc: &DocRef,
        data: Value,
        mode: SetMode,
    ) -> Result<(), DbError> {
        ensure_object(&data)?;
        let _guard = self.write_lock.lock().await;
        let existing = self.load(&doc.path()).await?;

        let (operation, next) = match (existing.clone(), mode) {
            (None, _) => (Operation::Create, data),
            (Some(_), SetMode::Overwrite) => (Operation::Update, data),
            (Some(mut current), SetMode::Merge) => {
                merge_into(&mut current, data);
                (Operation::Update, current)
            }
        };

        self.authorize(
            caller,
            operation,
            doc.segments(),
            existing.as_ref(),
            Some(&next),
            None,
        )
        .await?;

        self.write(doc, &next).await?;
        let kind = if operation == Operation::Create {
            ChangeKind::Created
        } else {
            ChangeKind::Updated
        };
        self.publish(doc, kind);
        Ok(())
    }

    /// Altera campos de um documento existente
    pub async fn update(
        &self,
        caller: Option<&Caller>,
        doc: &DocRef,
        patch: Value,
    ) -> Result<(), DbError> {
        ensure_object(&patch)?;
        let _guard = self.write_lock.lock().await;
        let Some(existing) = self.load(&doc.path()).await? else {
            // Quem as regras negariam recebe a negação, não a ausência
            self.authorize(
                caller,
                Operation::Update,
                doc.segments(),
                None,
                Some(&patch),
                None,
            )
            .await?;
            return Err(DbError::NotFound(doc.path()));
        };

        let mut next = existing.clone();
        merge_into(&mut next, patch);

        self.authorize(
            caller,
            Operation::Update,
            doc.segments(),
            Some(&existing),
            Some(&next),
            None,
        )
        .await?;

        self.write(doc, &next).await?;
        self.publish(doc, ChangeKind::Updated);
        Ok(())
    }

    pub async fn delete(&self, caller: Option<&Caller>, doc: &DocRef) -> Result<(), DbError> {
        let _guard = self.write_lock.lock().await;
        let existing = self.load(&doc.path()).await?;
        self.authorize(caller, Operation::Delete, doc.segments(), existing.as_ref(), None, None)
            .await?;

        let result = sqlx::query("DELETE FROM documents WHERE path = ?")
            .bind(doc.path())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            self.publish(doc, ChangeKind::Deleted);
        }
        Ok(())
    }

    async fn authorize(
        &self,
        caller: Option<&Caller>,
        operation: Operation,
        segments: &[String],
        existing: Option<&Value>,
        incoming: Option<&Value>,
        query: Option<&Query>,
    ) -> Result<(), DbError> {
        let is_admin = match caller {
            Some(caller) => self.is_admin(&caller.uid).await?,
            None => false,
        };

        let ctx = RuleContext {
            caller,
            is_admin,
            operation,
            segments,
            existing,
            incoming,
            query,
        };

        if rules::evaluate(&ctx) {
            Ok(())
        } else {
            let path = segments.join("/");
            debug!("Regras negaram {} em {}", operation, path);
            Err(DbError::PermissionDenied { path, operation })
        }
    }

    async fn load(&self, path: &str) -> Result<Option<Value>, DbError> {
        let raw: Option<String> = sqlx::query_scalar("SELECT data FROM documents WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        raw.map(|raw| serde_json::from_str(&raw).map_err(DbError::from))
            .transpose()
    }

    async fn write(&self, doc: &DocRef, data: &Value) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO documents (path, collection, doc_id, data)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                data = excluded.data,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(doc.path())
        .bind(doc.parent().path())
        .bind(doc.id())
        .bind(data.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn publish(&self, doc: &DocRef, kind: ChangeKind) {
        let event = ChangeEvent {
            collection: doc.parent().path(),
            path: doc.path(),
            kind,
        };
        // Sem receptores ativos o envio falha, o que é esperado
        if self.changes.send(event).is_err() {
            debug!("Mudança em {} sem assinantes", doc.path());
        }
    }
}
