//! Wire messages exchanged with observers.
//!
//! Outbound messages share one envelope:
//!
//! ```json
//! { "type": "phase_change", "workflowId": "wf_…", "timestamp": "2026-…Z", "data": { … } }
//! ```
//!
//! The variant set is closed; [`MessagePayload`] is matched exhaustively by
//! the broadcaster and by tests. Inbound frames are parsed as
//! [`ClientMessage`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ConnectionId, ResponseId, SessionId, WorkflowId};
use crate::phase::WorkflowPhase;
use crate::workflow::{Feedback, WorkflowInstance};

/// Variant-specific message content. Serialized as `type` + `data`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MessagePayload {
    /// First message on every new connection.
    #[serde(rename_all = "camelCase")]
    ConnectionAck {
        /// Id assigned to the connection.
        connection_id: ConnectionId,
        /// Session the connection belongs to.
        session_id: SessionId,
        /// How often the server sends heartbeats.
        heartbeat_interval_secs: u64,
        /// Idle time after which the server evicts the connection.
        heartbeat_timeout_secs: u64,
    },
    /// Periodic liveness probe. Observers answer with any frame.
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        /// Seconds until the next heartbeat.
        interval_secs: u64,
    },
    /// A phase output was recorded.
    #[serde(rename_all = "camelCase")]
    WorkflowUpdate {
        /// Current phase.
        phase: WorkflowPhase,
        /// Current progress.
        progress_percentage: u8,
        /// Key the output was stored under.
        output_key: String,
        /// Opaque output payload.
        output: Value,
    },
    /// The workflow moved to a new phase.
    #[serde(rename_all = "camelCase")]
    PhaseChange {
        /// Phase before the transition.
        old_phase: WorkflowPhase,
        /// Phase after the transition.
        new_phase: WorkflowPhase,
        /// Progress after the transition.
        progress_percentage: u8,
    },
    /// Feedback was recorded without a phase change.
    #[serde(rename_all = "camelCase")]
    ProgressUpdate {
        /// Current progress.
        progress_percentage: u8,
        /// Current phase.
        phase: WorkflowPhase,
        /// Human-readable status line.
        message: String,
    },
    /// One fragment of a streamed assistant response.
    #[serde(rename_all = "camelCase")]
    AiResponseChunk {
        /// Stream id.
        response_id: ResponseId,
        /// Text fragment.
        text: String,
        /// Always `false` for chunks.
        is_final: bool,
    },
    /// End of a streamed assistant response.
    #[serde(rename_all = "camelCase")]
    AiResponseComplete {
        /// Stream id.
        response_id: ResponseId,
        /// Full concatenated response text.
        text: String,
        /// Always `true`.
        is_final: bool,
    },
    /// Full workflow snapshot sent to a newly (re)connected observer.
    StateRecovery {
        /// The workflow as it stands on the server.
        workflow: WorkflowInstance,
    },
    /// Something the observer asked for failed.
    Error {
        /// Machine-readable code.
        code: String,
        /// Human-readable description.
        message: String,
    },
}

impl MessagePayload {
    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionAck { .. } => "connection_ack",
            Self::Heartbeat { .. } => "heartbeat",
            Self::WorkflowUpdate { .. } => "workflow_update",
            Self::PhaseChange { .. } => "phase_change",
            Self::ProgressUpdate { .. } => "progress_update",
            Self::AiResponseChunk { .. } => "ai_response_chunk",
            Self::AiResponseComplete { .. } => "ai_response_complete",
            Self::StateRecovery { .. } => "state_recovery",
            Self::Error { .. } => "error",
        }
    }
}

/// Outbound message envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Tag and data.
    #[serde(flatten)]
    pub payload: MessagePayload,
    /// Workflow the message concerns.
    pub workflow_id: WorkflowId,
    /// When the message was produced.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Wrap a payload, stamping it with the current time.
    pub fn new(workflow_id: &WorkflowId, payload: MessagePayload) -> Self {
        Self {
            payload,
            workflow_id: workflow_id.clone(),
            timestamp: Utc::now(),
        }
    }

    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// `connection_ack`.
    pub fn connection_ack(
        workflow_id: &WorkflowId,
        connection_id: &ConnectionId,
        session_id: &SessionId,
        heartbeat_interval_secs: u64,
        heartbeat_timeout_secs: u64,
    ) -> Self {
        Self::new(
            workflow_id,
            MessagePayload::ConnectionAck {
                connection_id: connection_id.clone(),
                session_id: session_id.clone(),
                heartbeat_interval_secs,
                heartbeat_timeout_secs,
            },
        )
    }

    /// `heartbeat`.
    pub fn heartbeat(workflow_id: &WorkflowId, interval_secs: u64) -> Self {
        Self::new(workflow_id, MessagePayload::Heartbeat { interval_secs })
    }

    /// `phase_change`.
    pub fn phase_change(
        workflow_id: &WorkflowId,
        old_phase: WorkflowPhase,
        new_phase: WorkflowPhase,
        progress_percentage: u8,
    ) -> Self {
        Self::new(
            workflow_id,
            MessagePayload::PhaseChange {
                old_phase,
                new_phase,
                progress_percentage,
            },
        )
    }

    /// `progress_update`.
    pub fn progress_update(
        workflow_id: &WorkflowId,
        progress_percentage: u8,
        phase: WorkflowPhase,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            workflow_id,
            MessagePayload::ProgressUpdate {
                progress_percentage,
                phase,
                message: message.into(),
            },
        )
    }

    /// `workflow_update` for a freshly stored output.
    pub fn workflow_update(workflow: &WorkflowInstance, output_key: &str, output: Value) -> Self {
        Self::new(
            &workflow.id,
            MessagePayload::WorkflowUpdate {
                phase: workflow.phase,
                progress_percentage: workflow.progress_percentage,
                output_key: output_key.to_owned(),
                output,
            },
        )
    }

    /// `ai_response_chunk`.
    pub fn ai_response_chunk(
        workflow_id: &WorkflowId,
        response_id: &ResponseId,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            workflow_id,
            MessagePayload::AiResponseChunk {
                response_id: response_id.clone(),
                text: text.into(),
                is_final: false,
            },
        )
    }

    /// `ai_response_complete`.
    pub fn ai_response_complete(
        workflow_id: &WorkflowId,
        response_id: &ResponseId,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            workflow_id,
            MessagePayload::AiResponseComplete {
                response_id: response_id.clone(),
                text: text.into(),
                is_final: true,
            },
        )
    }

    /// `state_recovery` carrying a full snapshot.
    pub fn state_recovery(workflow: &WorkflowInstance) -> Self {
        Self::new(
            &workflow.id,
            MessagePayload::StateRecovery {
                workflow: workflow.clone(),
            },
        )
    }

    /// `error`.
    pub fn error(
        workflow_id: &WorkflowId,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            workflow_id,
            MessagePayload::Error {
                code: code.into(),
                message: message.into(),
            },
        )
    }
}

/// Frames an observer may send over its connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Answer to a server heartbeat.
    HeartbeatAck,
    /// Client-initiated liveness probe; the server replies with a heartbeat.
    Ping,
    /// Submit feedback for the connection's workflow.
    Feedback(Feedback),
    /// Ask for a fresh `state_recovery` snapshot.
    RequestState,
}
