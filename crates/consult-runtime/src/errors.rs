//! Runtime error types.

/// Errors raised by the workflow state store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// No workflow with this id exists.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),
}

impl RuntimeError {
    /// Whether the caller can retry the same request and expect a
    /// different outcome.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::WorkflowNotFound(_) => false,
        }
    }

    /// Error category string, used as the wire error code.
    pub fn category(&self) -> &'static str {
        match self {
            Self::WorkflowNotFound(_) => "not_found",
        }
    }
}
