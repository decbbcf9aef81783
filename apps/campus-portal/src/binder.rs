//! Consultas ao vivo sobre coleções e documentos
//!
//! Uma assinatura entrega o conjunto completo de documentos que casam com a
//! consulta (nunca um diff), primeiro na abertura e de novo a cada escrita
//! confirmada na coleção observada. Uma negação de acesso é entregue como
//! erro, reportada uma vez ao canal de diagnóstico, e encerra a assinatura.
//! Não há nova tentativa.

use std::{
    future::Future,
    marker::PhantomData,
    pin::Pin,
    task::{Context, Poll},
};

use campus_db::{
    Caller, ChangeEvent, CollectionRef, DbError, DocRef, DocumentStore, Operation, Query,
};
use futures::Stream;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::diagnostics::{PermissionErrorEvent, PermissionErrorReporter};
use crate::error::PortalError;

/// Snapshots ainda não consumidos por assinatura
const SNAPSHOT_BUFFER: usize = 8;

/// Documento decodificado com seu id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record<T> {
    pub id: String,
    #[serde(flatten)]
    pub data: T,
}

/// Assinatura ativa; cancela ao sair de escopo
pub struct LiveQuery<S> {
    rx: mpsc::Receiver<Result<S, PortalError>>,
    task: JoinHandle<()>,
}

impl<S> LiveQuery<S> {
    pub async fn next_snapshot(&mut self) -> Option<Result<S, PortalError>> {
        self.rx.recv().await
    }

    /// Encerra a assinatura e descarta snapshots pendentes
    pub fn close(&mut self) {
        self.task.abort();
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    pub fn unsubscribe(mut self) {
        self.close();
    }
}

impl<S> Stream for LiveQuery<S> {
    type Item = Result<S, PortalError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<S> Drop for LiveQuery<S> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Coleção tipada sobre a qual se abrem consultas ao vivo
pub struct BoundCollection<T> {
    store: DocumentStore,
    reporter: PermissionErrorReporter,
    collection: CollectionRef,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for BoundCollection<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            reporter: self.reporter.clone(),
            collection: self.collection.clone(),
            _record: PhantomData,
        }
    }
}

impl<T> BoundCollection<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn new(
        store: DocumentStore,
        reporter: PermissionErrorReporter,
        collection: CollectionRef,
    ) -> Self {
        Self {
            store,
            reporter,
            collection,
            _record: PhantomData,
        }
    }

    pub fn collection(&self) -> &CollectionRef {
        &self.collection
    }

    /// Consulta sem filtros sobre a coleção
    pub fn query(&self) -> Query {
        Query::new(self.collection.clone())
    }

    pub fn subscribe(&self, caller: Option<Caller>, query: Query) -> LiveQuery<Vec<Record<T>>> {
        let store = self.store.clone();
        let path = query.collection.path();
        debug!("Abrindo consulta ao vivo em {}", path);

        let fetch = move || {
            let store = store.clone();
            let caller = caller.clone();
            let query = query.clone();
            async move {
                let documents = store.query(caller.as_ref(), &query).await?;
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
        };

        spawn_live(
            &self.store,
            self.reporter.clone(),
            path,
            Operation::List,
            fetch,
        )
    }
}

/// Documento tipado observado ao vivo (ex.: `campusInfo/hospital`)
pub struct BoundDocument<T> {
    store: DocumentStore,
    reporter: PermissionErrorReporter,
    doc: DocRef,
    _record: PhantomData<fn() -> T>,
}

impl<T> BoundDocument<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn new(store: DocumentStore, reporter: PermissionErrorReporter, doc: DocRef) -> Self {
        Self {
            store,
            reporter,
            doc,
            _record: PhantomData,
        }
    }

    /// Entrega `None` enquanto o documento não existir
    pub fn watch(&self, caller: Option<Caller>) -> LiveQuery<Option<T>> {
        let store = self.store.clone();
        let doc = self.doc.clone();

        let fetch = move || {
            let store = store.clone();
            let caller = caller.clone();
            let doc = doc.clone();
            async move {
                let found = store.get(caller.as_ref(), &doc).await?;
                Ok(found.and_then(|d| match d.decode::<T>() {
                    Ok(data) => Some(data),
                    Err(e) => {
                        warn!("Documento {} ignorado: {}", d.path, e);
                        None
                    }
                }))
            }
        };

        spawn_live(
            &self.store,
            self.reporter.clone(),
            self.doc.path(),
            Operation::Get,
            fetch,
        )
    }
}

fn spawn_live<S, F, Fut>(
    store: &DocumentStore,
    reporter: PermissionErrorReporter,
    watched: String,
    operation: Operation,
    fetch: F,
) -> LiveQuery<S>
where
    S: Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<S, DbError>> + Send,
{
    let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
    // Assina o feed antes da primeira leitura para não perder escritas concorrentes
    let mut changes = store.subscribe_changes();

    let task = tokio::spawn(async move {
        loop {
            match fetch().await {
                Ok(snapshot) => {
                    if tx.send(Ok(snapshot)).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    if err.is_permission_denied() {
                        reporter.report(PermissionErrorEvent::new(&watched, operation, None));
                    } else {
                        warn!("Consulta ao vivo em {} falhou: {}", watched, err);
                    }
                    let _ = tx.send(Err(err.into())).await;
                    return;
                }
            }

            if !wait_for_change(&mut changes, &watched).await {
                debug!("Feed de mudanças encerrado para {}", watched);
                return;
            }
        }
    });

    LiveQuery { rx, task }
}

fn touches(event: &ChangeEvent, watched: &str) -> bool {
    event.collection == watched || event.path == watched
}

/// Espera uma mudança relevante; `false` quando o feed foi fechado
async fn wait_for_change(changes: &mut broadcast::Receiver<ChangeEvent>, watched: &str) -> bool {
    loop {
        match changes.recv().await {
            Ok(event) if touches(&event, watched) => break,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("{} mudanças perdidas em {}; relendo", skipped, watched);
                break;
            }
            Err(broadcast::error::RecvError::Closed) => return false,
        }
    }

    // Agrupa mudanças já enfileiradas numa única releitura
    loop {
        match changes.try_recv() {
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(broadcast::error::TryRecvError::Empty) => return true,
            Err(broadcast::error::TryRecvError::Closed) => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_db::{models::DoctorStatus, testing::temp_store, SetMode};
    use futures::StreamExt;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::{assert_pending, task};

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Rating {
        student_id: String,
        food_quality_rating: u8,
    }

    async fn next<S>(live: &mut LiveQuery<S>) -> Result<S, PortalError> {
        tokio::time::timeout(Duration::from_secs(5), live.next())
            .await
            .expect("snapshot no prazo")
            .expect("assinatura aberta")
    }

    #[tokio::test]
    async fn test_full_snapshot_redelivered_on_change() -> anyhow::Result<()> {
        let (_dir, store) = temp_store().await?;
        let reporter = PermissionErrorReporter::new();
        let ratings: BoundCollection<Rating> = BoundCollection::new(
            store.clone(),
            reporter,
            CollectionRef::mess_food_ratings(),
        );
        let student = Caller::new("s1");

        let mut live = ratings.subscribe(Some(student.clone()), ratings.query());
        assert!(next(&mut live).await?.is_empty());

        for (expected, rating) in [(1, 3), (2, 5)] {
            store
                .add(
                    Some(&student),
                    ratings.collection(),
                    json!({"studentId": "s1", "foodQualityRating": rating}),
                )
                .await?;
            // Conjunto completo, não só o documento novo
            let snapshot = next(&mut live).await?;
            assert_eq!(snapshot.len(), expected);
            assert!(snapshot.iter().any(|r| r.data.food_quality_rating == rating));
            assert!(snapshot.iter().all(|r| r.data.student_id == "s1"));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_no_snapshot_without_changes() -> anyhow::Result<()> {
        let (_dir, store) = temp_store().await?;
        let ratings: BoundCollection<Rating> = BoundCollection::new(
            store.clone(),
            PermissionErrorReporter::new(),
            CollectionRef::mess_food_ratings(),
        );

        let mut live = ratings.subscribe(Some(Caller::new("s1")), ratings.query());
        next(&mut live).await?;

        let mut pending = task::spawn(live.next());
        assert_pending!(pending.poll());
        Ok(())
    }

    #[tokio::test]
    async fn test_denied_subscription_reports_once_and_ends() -> anyhow::Result<()> {
        let (_dir, store) = temp_store().await?;
        let reporter = PermissionErrorReporter::new();
        let mut diagnostics = reporter.subscribe();
        let feedbacks: BoundCollection<serde_json::Value> = BoundCollection::new(
            store,
            reporter,
            CollectionRef::hospital_feedbacks(),
        );

        let mut live = feedbacks.subscribe(Some(Caller::new("student")), feedbacks.query());
        let err = next(&mut live).await.unwrap_err();
        assert!(matches!(err, PortalError::PermissionDenied { .. }));
        assert!(live.next().await.is_none());

        let event = diagnostics.recv().await?;
        assert_eq!(event.path, "hospitalFeedbacks");
        assert_eq!(event.operation, Operation::List);
        assert!(diagnostics.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_closed_subscription_delivers_nothing() -> anyhow::Result<()> {
        let (_dir, store) = temp_store().await?;
        let ratings: BoundCollection<Rating> = BoundCollection::new(
            store.clone(),
            PermissionErrorReporter::new(),
            CollectionRef::mess_food_ratings(),
        );
        let student = Caller::new("s1");

        let mut live = ratings.subscribe(Some(student.clone()), ratings.query());
        next(&mut live).await?;
        live.close();

        store
            .add(
                Some(&student),
                ratings.collection(),
                json!({"studentId": "s1", "foodQualityRating": 2}),
            )
            .await?;
        assert!(live.next().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_document_watch_sees_creation() -> anyhow::Result<()> {
        let (_dir, store) = temp_store().await?;
        store.grant_admin("admin").await?;
        let admin = Caller::new("admin");
        let status: BoundDocument<DoctorStatus> = BoundDocument::new(
            store.clone(),
            PermissionErrorReporter::new(),
            DocRef::hospital_status(),
        );

        let mut live = status.watch(Some(Caller::new("s1")));
        assert_eq!(next(&mut live).await?, None);

        store
            .set(
                Some(&admin),
                &DocRef::hospital_status(),
                json!({"name": "Dr. Rao", "specialty": "ENT", "isAvailable": false}),
                SetMode::Merge,
            )
            .await?;

        let current = next(&mut live).await?.expect("status criado");
        assert_eq!(current.name, "Dr. Rao");
        assert!(!current.is_available);
        Ok(())
    }
}
