//! Canal de diagnóstico de negações de permissão
//!
//! Falhas de acesso são republicadas com caminho, operação e dados tentados.
//! O ouvinte de desenvolvimento só registra os eventos; nada aqui afeta o
//! resultado das operações.

use campus_db::Operation;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::Serialize;
use serde_json::Value;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, warn};

const DIAGNOSTIC_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionErrorEvent {
    pub path: String,
    pub operation: Operation,
    /// Dados que a escrita tentou gravar
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_resource_data: Option<Value>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl PermissionErrorEvent {
    pub fn new(path: impl Into<String>, operation: Operation, data: Option<Value>) -> Self {
        let path = path.into();
        Self {
            message: format!("Missing or insufficient permissions: {operation} on {path}"),
            path,
            operation,
            request_resource_data: data,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PermissionErrorReporter {
    tx: broadcast::Sender<PermissionErrorEvent>,
}

impl Default for PermissionErrorReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionErrorReporter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DIAGNOSTIC_CAPACITY);
        Self { tx }
    }

    pub fn report(&self, event: PermissionErrorEvent) {
        if self.tx.send(event).is_err() {
            debug!("Evento de permissão descartado: nenhum ouvinte ativo");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PermissionErrorEvent> {
        self.tx.subscribe()
    }

    /// Eventos como fluxo; atrasos descartam os mais antigos
    pub fn stream(&self) -> impl Stream<Item = PermissionErrorEvent> + Send + 'static {
        stream::unfold(self.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Fluxo de diagnóstico pulou {} eventos", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    /// Ouvinte de desenvolvimento: registra cada evento como log estruturado
    pub fn spawn_dev_listener(&self) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let payload = event
                            .request_resource_data
                            .as_ref()
                            .map(Value::to_string)
                            .unwrap_or_default();
                        warn!(
                            path = %event.path,
                            operation = %event.operation,
                            payload = %payload,
                            "permission-error: {}",
                            event.message
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Ouvinte de diagnóstico perdeu {} eventos", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_report_reaches_subscribers() {
        let reporter = PermissionErrorReporter::new();
        let mut rx = reporter.subscribe();

        reporter.report(PermissionErrorEvent::new(
            "messFoodRatings",
            Operation::Create,
            Some(json!({"studentId": "s1"})),
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.path, "messFoodRatings");
        assert_eq!(event.operation, Operation::Create);
        assert_eq!(event.request_resource_data, Some(json!({"studentId": "s1"})));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stream_yields_reported_events() {
        use futures::StreamExt;

        let reporter = PermissionErrorReporter::new();
        let mut events = Box::pin(reporter.stream());
        let mut next = tokio_test::task::spawn(events.next());
        tokio_test::assert_pending!(next.poll());

        reporter.report(PermissionErrorEvent::new("appointments", Operation::List, None));
        let event = tokio_test::assert_ready!(next.poll()).unwrap();
        assert_eq!(event.path, "appointments");
    }

    #[test]
    fn test_report_without_listeners_is_silent() {
        let reporter = PermissionErrorReporter::new();
        reporter.report(PermissionErrorEvent::new("appointments", Operation::List, None));
    }

    #[test]
    fn test_event_wire_shape() {
        let event = PermissionErrorEvent::new("campusInfo/hospital", Operation::Update, None);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["operation"], "update");
        assert!(value.get("requestResourceData").is_none());
    }
}
