//! Message fan-out to a workflow's observers.

use std::pin::pin;
use std::sync::Arc;

use consult_core::{ConnectionId, Message, ResponseId, WorkflowId, WorkflowInstance};
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::connection::{Connection, TransportError};
use super::registry::ConnectionRegistry;
use crate::metrics::{WS_BROADCAST_DROPS_TOTAL, WS_BROADCASTS_TOTAL};

/// Outcome of one fan-out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the message was addressed to.
    pub recipients: usize,
    /// Connections that accepted it.
    pub delivered: usize,
    /// Connections unregistered because the send failed.
    pub pruned: Vec<ConnectionId>,
}

/// Delivers messages to every connection of a workflow.
///
/// Delivery is best-effort and at-most-once. A connection whose send fails
/// is unregistered once the fan-out finishes; the others are unaffected.
/// Sends in flight across all fan-outs are capped by a shared semaphore.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    permits: Arc<Semaphore>,
}

impl Broadcaster {
    /// Create a broadcaster over `registry` allowing at most
    /// `max_concurrent_sends` sends in flight.
    pub fn new(registry: Arc<ConnectionRegistry>, max_concurrent_sends: usize) -> Self {
        Self {
            registry,
            permits: Arc::new(Semaphore::new(max_concurrent_sends.max(1))),
        }
    }

    /// Send `message` to every connection observing `workflow_id`.
    pub async fn broadcast(&self, workflow_id: &WorkflowId, message: &Message) -> DeliveryReport {
        let targets = self.registry.for_workflow(workflow_id);
        if targets.is_empty() {
            return DeliveryReport::default();
        }
        let frame = match message.to_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "failed to serialize message");
                return DeliveryReport {
                    recipients: targets.len(),
                    ..DeliveryReport::default()
                };
            }
        };
        metrics::counter!(WS_BROADCASTS_TOTAL, "type" => message.kind()).increment(1);
        let report = self.fan_out(targets, frame).await;
        debug!(
            kind = message.kind(),
            workflow_id = %workflow_id,
            recipients = report.recipients,
            delivered = report.delivered,
            pruned = report.pruned.len(),
            "broadcast"
        );
        report
    }

    /// One `heartbeat` fan-out per observed workflow.
    pub async fn broadcast_heartbeats(&self, interval_secs: u64) -> DeliveryReport {
        let mut total = DeliveryReport::default();
        for workflow_id in self.registry.workflow_ids() {
            let report = self
                .broadcast(&workflow_id, &Message::heartbeat(&workflow_id, interval_secs))
                .await;
            total.recipients += report.recipients;
            total.delivered += report.delivered;
            total.pruned.extend(report.pruned);
        }
        total
    }

    /// Send a `state_recovery` snapshot to a single connection. The
    /// connection is unregistered if the send fails.
    pub async fn send_state_recovery(
        &self,
        connection: &Connection,
        workflow: &WorkflowInstance,
    ) -> Result<(), TransportError> {
        let result = connection.send(&Message::state_recovery(workflow)).await;
        if let Err(ref e) = result {
            warn!(conn_id = %connection.id(), error = %e, "state recovery failed, pruning");
            self.prune(connection);
        }
        result
    }

    /// Relay a streamed response: one `ai_response_chunk` per fragment in
    /// order, then one `ai_response_complete` carrying the full text.
    ///
    /// Returns the concatenated text.
    pub async fn stream_response<S>(
        &self,
        workflow_id: &WorkflowId,
        response_id: &ResponseId,
        chunks: S,
    ) -> String
    where
        S: Stream<Item = String>,
    {
        let mut chunks = pin!(chunks);
        let mut full = String::new();
        while let Some(chunk) = chunks.next().await {
            full.push_str(&chunk);
            let _ = self
                .broadcast(
                    workflow_id,
                    &Message::ai_response_chunk(workflow_id, response_id, chunk),
                )
                .await;
        }
        let _ = self
            .broadcast(
                workflow_id,
                &Message::ai_response_complete(workflow_id, response_id, full.clone()),
            )
            .await;
        full
    }

    async fn fan_out(&self, targets: Vec<Arc<Connection>>, frame: Arc<String>) -> DeliveryReport {
        let recipients = targets.len();
        let mut sends: FuturesUnordered<_> = targets
            .into_iter()
            .map(|conn| {
                let permits = Arc::clone(&self.permits);
                let frame = Arc::clone(&frame);
                async move {
                    // The semaphore is never closed.
                    let _permit = permits.acquire_owned().await.ok();
                    let result = conn.send_raw(frame).await;
                    (conn, result)
                }
            })
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        while let Some((conn, result)) = sends.next().await {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(conn_id = %conn.id(), error = %e, "broadcast send failed, pruning");
                    failed.push(conn);
                }
            }
        }

        let pruned = failed
            .iter()
            .map(|conn| {
                self.prune(conn);
                conn.id().clone()
            })
            .collect();
        DeliveryReport {
            recipients,
            delivered,
            pruned,
        }
    }

    fn prune(&self, connection: &Connection) {
        if self.registry.unregister(connection) {
            metrics::counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::TransportEnds;
    use consult_core::{SessionId, WorkflowPhase};
    use std::time::Duration;

    async fn connect(registry: &ConnectionRegistry, workflow: &str) -> (Arc<Connection>, TransportEnds) {
        let (conn, mut ends) = Connection::open(
            WorkflowId::from(workflow),
            SessionId::from(workflow),
            16,
            Duration::from_millis(50),
        );
        registry.register(Arc::clone(&conn)).await.unwrap();
        // Discard the ack.
        let _ = ends.outbound.recv().await.unwrap();
        (conn, ends)
    }

    fn setup() -> (Arc<ConnectionRegistry>, Broadcaster) {
        let registry = Arc::new(ConnectionRegistry::new(30, 90));
        let broadcaster = Broadcaster::new(Arc::clone(&registry), 4);
        (registry, broadcaster)
    }

    fn kind_of(frame: &str) -> String {
        let value: serde_json::Value = serde_json::from_str(frame).unwrap();
        value["type"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn broadcast_reaches_only_its_workflow() {
        let (registry, broadcaster) = setup();
        let (_a, mut ea) = connect(&registry, "W1").await;
        let (_b, mut eb) = connect(&registry, "W1").await;
        let (_c, mut ec) = connect(&registry, "W2").await;

        let msg = Message::phase_change(
            &WorkflowId::from("W1"),
            WorkflowPhase::Requirements,
            WorkflowPhase::Architecture,
            40,
        );
        let report = broadcaster.broadcast(&WorkflowId::from("W1"), &msg).await;
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 2);
        assert!(report.pruned.is_empty());

        assert_eq!(kind_of(&ea.outbound.recv().await.unwrap()), "phase_change");
        assert_eq!(kind_of(&eb.outbound.recv().await.unwrap()), "phase_change");
        assert!(ec.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_workflow_is_noop() {
        let (registry, broadcaster) = setup();
        let report = broadcaster
            .broadcast(&WorkflowId::from("W9"), &Message::heartbeat(&WorkflowId::from("W9"), 30))
            .await;
        assert_eq!(report, DeliveryReport::default());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn failed_connection_is_pruned() {
        let (registry, broadcaster) = setup();
        let (_a, mut ea) = connect(&registry, "W1").await;
        let (b, eb) = connect(&registry, "W1").await;
        assert_eq!(registry.count(), 2);
        drop(eb);

        let wf = WorkflowId::from("W1");
        let report = broadcaster
            .broadcast(&wf, &Message::progress_update(&wf, 20, WorkflowPhase::Requirements, "noted"))
            .await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, vec![b.id().clone()]);
        assert_eq!(registry.count(), 1);
        assert_eq!(kind_of(&ea.outbound.recv().await.unwrap()), "progress_update");
    }

    #[tokio::test]
    async fn per_connection_order_follows_call_order() {
        let (registry, broadcaster) = setup();
        let (_a, mut ea) = connect(&registry, "W1").await;
        let wf = WorkflowId::from("W1");
        for pct in [20u8, 40, 60] {
            let _ = broadcaster
                .broadcast(&wf, &Message::progress_update(&wf, pct, WorkflowPhase::Requirements, ""))
                .await;
        }
        for pct in [20, 40, 60] {
            let frame = ea.outbound.recv().await.unwrap();
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(value["data"]["progressPercentage"], pct);
        }
    }

    #[tokio::test]
    async fn heartbeats_cover_every_workflow() {
        let (registry, broadcaster) = setup();
        let (_a, mut ea) = connect(&registry, "W1").await;
        let (_b, mut eb) = connect(&registry, "W2").await;
        let report = broadcaster.broadcast_heartbeats(30).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(kind_of(&ea.outbound.recv().await.unwrap()), "heartbeat");
        assert_eq!(kind_of(&eb.outbound.recv().await.unwrap()), "heartbeat");
    }

    #[tokio::test]
    async fn stream_response_sends_chunks_then_complete() {
        let (registry, broadcaster) = setup();
        let (_a, mut ea) = connect(&registry, "W1").await;
        let resp = ResponseId::from("r1");
        let chunks = futures::stream::iter(vec!["Use ".to_owned(), "Postgres".to_owned()]);
        let full = broadcaster
            .stream_response(&WorkflowId::from("W1"), &resp, chunks)
            .await;
        assert_eq!(full, "Use Postgres");

        let mut frames = Vec::new();
        for _ in 0..3 {
            let frame = ea.outbound.recv().await.unwrap();
            frames.push(serde_json::from_str::<serde_json::Value>(&frame).unwrap());
        }
        assert_eq!(frames[0]["type"], "ai_response_chunk");
        assert_eq!(frames[0]["data"]["text"], "Use ");
        assert_eq!(frames[1]["data"]["text"], "Postgres");
        assert_eq!(frames[1]["data"]["isFinal"], false);
        assert_eq!(frames[2]["type"], "ai_response_complete");
        assert_eq!(frames[2]["data"]["text"], "Use Postgres");
        assert_eq!(frames[2]["data"]["isFinal"], true);
        assert!(ea.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_stream_still_completes() {
        let (registry, broadcaster) = setup();
        let (_a, mut ea) = connect(&registry, "W1").await;
        let full = broadcaster
            .stream_response(
                &WorkflowId::from("W1"),
                &ResponseId::from("r2"),
                futures::stream::empty::<String>(),
            )
            .await;
        assert!(full.is_empty());
        assert_eq!(kind_of(&ea.outbound.recv().await.unwrap()), "ai_response_complete");
    }

    #[tokio::test]
    async fn state_recovery_failure_prunes() {
        let (registry, broadcaster) = setup();
        let (a, ea) = connect(&registry, "W1").await;
        drop(ea);
        let wf = WorkflowInstance::new(WorkflowId::from("W1"), SessionId::from("W1"), None);
        assert!(broadcaster.send_state_recovery(&a, &wf).await.is_err());
        assert_eq!(registry.count(), 0);
    }
}
