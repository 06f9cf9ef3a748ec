//! Workflow instances and the feedback that drives them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::ids::{SessionId, WorkflowId};
use crate::phase::WorkflowPhase;

/// Output key under which the payload passed at creation is stored.
pub const INITIAL_PAYLOAD_KEY: &str = "initialization";

/// The kind of a feedback event after resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// Accept the current phase and move on.
    Approval,
    /// Ask for changes within the current phase.
    Modification,
    /// Ask a question about the current phase.
    Clarification,
}

/// A feedback kind resolved from caller input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedKind {
    /// The kind the state machine acts on.
    pub kind: FeedbackKind,
    /// `true` when the raw input was not recognised and fell back to
    /// [`FeedbackKind::Clarification`].
    pub degenerate: bool,
}

impl FeedbackKind {
    /// Resolve a raw kind string. Matching ignores case and surrounding
    /// whitespace; anything unrecognised degrades to `Clarification`.
    #[must_use]
    pub fn resolve(raw: &str) -> ResolvedKind {
        let kind = match raw.trim().to_ascii_lowercase().as_str() {
            "approval" => Some(Self::Approval),
            "modification" => Some(Self::Modification),
            "clarification" => Some(Self::Clarification),
            _ => None,
        };
        ResolvedKind {
            kind: kind.unwrap_or(Self::Clarification),
            degenerate: kind.is_none(),
        }
    }

    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approval => "approval",
            Self::Modification => "modification",
            Self::Clarification => "clarification",
        }
    }
}

/// A feedback submission as received from a caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    /// Raw kind string (`approval`, `modification`, `clarification`).
    pub kind: String,
    /// Free-text content.
    #[serde(default)]
    pub content: String,
    /// Optional rating, accepted as any JSON number. Only an integer in
    /// 1–5 is kept when the feedback is applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Number>,
}

impl Feedback {
    /// Build a submission.
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
            rating: None,
        }
    }

    /// Attach a rating.
    #[must_use]
    pub fn with_rating(mut self, rating: impl Into<Number>) -> Self {
        self.rating = Some(rating.into());
        self
    }
}

/// One entry of a workflow's feedback history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEvent {
    /// Resolved kind.
    pub kind: FeedbackKind,
    /// The raw kind, kept only when it was not recognised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_kind: Option<String>,
    /// Free-text content.
    pub content: String,
    /// Rating, if one in range was supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    /// When the feedback was received.
    pub timestamp: DateTime<Utc>,
    /// Phase active when the feedback was received.
    pub phase: WorkflowPhase,
}

/// One user's in-progress consultation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    /// Workflow id.
    pub id: WorkflowId,
    /// Session that created the workflow.
    pub session_id: SessionId,
    /// Current phase.
    pub phase: WorkflowPhase,
    /// 0–100, derived from the phase.
    pub progress_percentage: u8,
    /// Opaque payloads produced by content generators, keyed by phase or
    /// output name.
    pub phase_outputs: BTreeMap<String, Value>,
    /// Append-only feedback log.
    pub feedback_history: Vec<FeedbackEvent>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// A fresh workflow in [`WorkflowPhase::Initialization`].
    pub fn new(id: WorkflowId, session_id: SessionId, initial_payload: Option<Value>) -> Self {
        let now = Utc::now();
        let mut phase_outputs = BTreeMap::new();
        if let Some(payload) = initial_payload {
            let _ = phase_outputs.insert(INITIAL_PAYLOAD_KEY.to_owned(), payload);
        }
        Self {
            id,
            session_id,
            phase: WorkflowPhase::Initialization,
            progress_percentage: 0,
            phase_outputs,
            feedback_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Most recent feedback, if any.
    pub fn last_feedback(&self) -> Option<&FeedbackEvent> {
        self.feedback_history.last()
    }
}
