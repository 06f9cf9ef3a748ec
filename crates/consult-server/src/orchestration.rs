//! The orchestration façade: workflow mutations plus their broadcasts.
//!
//! Every mutation takes the workflow's lock, applies the change, and fans
//! the resulting message out before releasing the lock. Observers of one
//! workflow therefore see messages in the same order the mutations happened,
//! and a connection that joins mid-way gets a snapshot that no concurrent
//! change can slip past.

use std::sync::Arc;
use std::time::Duration;

use consult_core::{Feedback, Message, ResponseId, SessionId, WorkflowId, WorkflowInstance};
use consult_runtime::{FeedbackOutcome, RuntimeError, WorkflowStateMachine};
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument};

use crate::config::ServerConfig;
use crate::metrics::{
    FEEDBACK_DEGENERATE_TOTAL, WORKFLOW_PHASE_TRANSITIONS_TOTAL, WORKFLOWS_CREATED_TOTAL,
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_REJECTED_TOTAL, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::websocket::broadcast::Broadcaster;
use crate::websocket::connection::{Connection, TransportEnds, TransportError};
use crate::websocket::registry::{ConnectionRegistry, RegisterError};

/// Errors surfaced to callers of [`OrchestrationService`].
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// No workflow with this id.
    #[error("workflow not found: {0}")]
    NotFound(String),
    /// The connection limit was reached.
    #[error("connection limit reached ({0})")]
    AtCapacity(usize),
    /// The new connection's transport failed during setup.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

impl OrchestrationError {
    /// Machine-readable code, used on the wire and in HTTP error bodies.
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AtCapacity(_) => "at_capacity",
            Self::Transport(_) => "transport",
        }
    }
}

impl From<RegisterError> for OrchestrationError {
    fn from(e: RegisterError) -> Self {
        match e {
            RegisterError::AtCapacity(limit) => Self::AtCapacity(limit),
            RegisterError::Transport(e) => Self::Transport(e),
        }
    }
}

impl From<RuntimeError> for OrchestrationError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::WorkflowNotFound(id) => Self::NotFound(id),
        }
    }
}

/// Connection introspection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// All registered connections.
    pub total_connections: usize,
    /// Connections matching the filter (equal to the total when unfiltered).
    pub connections: usize,
    /// Workflows with at least one observer.
    pub workflow_ids: Vec<WorkflowId>,
    /// Advertised heartbeat interval.
    pub heartbeat_interval_secs: u64,
    /// Idle time before eviction.
    pub heartbeat_timeout_secs: u64,
}

/// Owns the workflow store, the connection registry, and the broadcaster.
pub struct OrchestrationService {
    machine: WorkflowStateMachine,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
    queue_capacity: usize,
    send_timeout: Duration,
}

impl OrchestrationService {
    /// Build a service with a fresh store and registry.
    pub fn new(config: &ServerConfig) -> Self {
        let registry = Arc::new(
            ConnectionRegistry::new(config.heartbeat_interval_secs, config.heartbeat_timeout_secs)
                .with_max_connections(config.max_connections),
        );
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::clone(&registry),
            config.max_concurrent_sends,
        ));
        Self {
            machine: WorkflowStateMachine::new(),
            registry,
            broadcaster,
            // The ack and the state recovery are queued before the socket
            // writer starts draining.
            queue_capacity: config.queue_capacity.max(2),
            send_timeout: config.send_timeout(),
        }
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The broadcaster.
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Number of workflows held.
    pub fn workflow_count(&self) -> usize {
        self.machine.count()
    }

    /// Create a workflow in `Initialization`. Nothing is broadcast.
    #[instrument(skip(self, initial_payload))]
    pub fn create_workflow(
        &self,
        session_id: Option<SessionId>,
        initial_payload: Option<Value>,
    ) -> WorkflowInstance {
        let workflow = self.machine.create(session_id, initial_payload);
        metrics::counter!(WORKFLOWS_CREATED_TOTAL).increment(1);
        info!(workflow_id = %workflow.id, session_id = %workflow.session_id, "workflow created");
        workflow
    }

    /// Apply feedback and notify every observer: `phase_change` if the phase
    /// moved, `progress_update` otherwise.
    #[instrument(skip(self, feedback), fields(kind = %feedback.kind))]
    pub async fn submit_feedback(
        &self,
        workflow_id: &WorkflowId,
        feedback: &Feedback,
    ) -> Result<FeedbackOutcome, OrchestrationError> {
        let (workflow, transition) = self.machine.submit_feedback(workflow_id, feedback).await?;

        let message = if transition.phase_changed() {
            metrics::counter!(
                WORKFLOW_PHASE_TRANSITIONS_TOTAL,
                "from" => transition.old_phase.as_str(),
                "to" => transition.new_phase.as_str()
            )
            .increment(1);
            info!(
                from = %transition.old_phase,
                to = %transition.new_phase,
                progress = transition.progress_percentage,
                "phase changed"
            );
            Message::phase_change(
                workflow_id,
                transition.old_phase,
                transition.new_phase,
                transition.progress_percentage,
            )
        } else {
            Message::progress_update(
                workflow_id,
                transition.progress_percentage,
                transition.new_phase,
                transition.next_step,
            )
        };
        if transition.degenerate {
            metrics::counter!(FEEDBACK_DEGENERATE_TOTAL).increment(1);
        }

        let _ = self.broadcaster.broadcast(workflow_id, &message).await;
        Ok(FeedbackOutcome {
            workflow: workflow.clone(),
            transition,
        })
    }

    /// Open and register a connection for `workflow_id`.
    ///
    /// If the workflow exists the new connection alone receives a
    /// `state_recovery` snapshot. The workflow stays locked from
    /// registration until the snapshot is queued, so no phase change can
    /// fall between the two.
    #[instrument(skip(self))]
    pub async fn connect(
        &self,
        workflow_id: WorkflowId,
        session_id: Option<SessionId>,
    ) -> Result<(Arc<Connection>, TransportEnds), OrchestrationError> {
        let session_id = session_id.unwrap_or_else(|| SessionId::for_workflow(&workflow_id));
        let (connection, ends) = Connection::open(
            workflow_id.clone(),
            session_id,
            self.queue_capacity,
            self.send_timeout,
        );

        let guard = self.machine.lock(&workflow_id).await.ok();
        if let Err(e) = self.registry.register(Arc::clone(&connection)).await {
            if matches!(e, RegisterError::AtCapacity(_)) {
                metrics::counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
            }
            return Err(e.into());
        }
        if let Some(workflow) = guard {
            self.broadcaster
                .send_state_recovery(&connection, &workflow)
                .await?;
        }

        metrics::counter!(WS_CONNECTIONS_TOTAL).increment(1);
        self.update_active_gauge();
        Ok((connection, ends))
    }

    /// Close and unregister a connection.
    pub fn disconnect(&self, connection: &Connection) {
        connection.close();
        if self.registry.unregister(connection) {
            metrics::counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
            info!(conn_id = %connection.id(), "connection closed");
        }
        self.update_active_gauge();
    }

    /// Current state of a workflow.
    pub async fn snapshot(&self, workflow_id: &WorkflowId) -> Result<WorkflowInstance, OrchestrationError> {
        Ok(self.machine.snapshot(workflow_id).await?)
    }

    /// Store an opaque phase output and broadcast `workflow_update`.
    #[instrument(skip(self, output))]
    pub async fn record_phase_output(
        &self,
        workflow_id: &WorkflowId,
        key: &str,
        output: Value,
    ) -> Result<WorkflowInstance, OrchestrationError> {
        let workflow = self
            .machine
            .record_phase_output(workflow_id, key, output.clone())
            .await?;
        let _ = self
            .broadcaster
            .broadcast(workflow_id, &Message::workflow_update(&workflow, key, output))
            .await;
        Ok(workflow.clone())
    }

    /// Relay a streamed assistant response to a workflow's observers.
    /// Returns the response id and the full text.
    pub async fn stream_response<S>(
        &self,
        workflow_id: &WorkflowId,
        chunks: S,
    ) -> Result<(ResponseId, String), OrchestrationError>
    where
        S: Stream<Item = String>,
    {
        if !self.machine.contains(workflow_id) {
            return Err(OrchestrationError::NotFound(workflow_id.to_string()));
        }
        let response_id = ResponseId::new();
        let text = self
            .broadcaster
            .stream_response(workflow_id, &response_id, chunks)
            .await;
        Ok((response_id, text))
    }

    /// Connection counts, optionally filtered to one workflow.
    pub fn stats(&self, workflow_id: Option<&WorkflowId>) -> ConnectionStats {
        let total = self.registry.count();
        ConnectionStats {
            total_connections: total,
            connections: workflow_id.map_or(total, |id| self.registry.count_for(id)),
            workflow_ids: self.registry.workflow_ids(),
            heartbeat_interval_secs: self.registry.heartbeat_interval_secs(),
            heartbeat_timeout_secs: self.registry.heartbeat_timeout_secs(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_active_gauge(&self) {
        metrics::gauge!(WS_CONNECTIONS_ACTIVE).set(self.registry.count() as f64);
    }
}
