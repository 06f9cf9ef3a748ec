//! The consultation phase sequence.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One step of the consultation workflow.
///
/// The ordering is total and fixed; [`WorkflowPhase::next`] always yields
/// the successor and saturates at [`WorkflowPhase::Complete`].
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    /// Workflow created, nothing captured yet.
    #[default]
    Initialization,
    /// Gathering the client's requirements.
    Requirements,
    /// Proposing a target architecture.
    Architecture,
    /// Producing implementation guidance.
    Implementation,
    /// Test strategy and validation.
    Testing,
    /// Rollout and deployment planning.
    Deployment,
    /// Terminal phase.
    Complete,
}

impl WorkflowPhase {
    /// Every phase in order.
    pub const ALL: [Self; 7] = [
        Self::Initialization,
        Self::Requirements,
        Self::Architecture,
        Self::Implementation,
        Self::Testing,
        Self::Deployment,
        Self::Complete,
    ];

    /// Successor phase, saturating at `Complete`.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Initialization => Self::Requirements,
            Self::Requirements => Self::Architecture,
            Self::Architecture => Self::Implementation,
            Self::Implementation => Self::Testing,
            Self::Testing => Self::Deployment,
            Self::Deployment | Self::Complete => Self::Complete,
        }
    }

    /// Whether no further transitions are defined.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Complete
    }

    /// Wire name (`snake_case`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::Requirements => "requirements",
            Self::Architecture => "architecture",
            Self::Implementation => "implementation",
            Self::Testing => "testing",
            Self::Deployment => "deployment",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_walks_the_sequence() {
        let mut phase = WorkflowPhase::Initialization;
        let mut seen = vec![phase];
        while !phase.is_terminal() {
            phase = phase.next();
            seen.push(phase);
        }
        assert_eq!(seen, WorkflowPhase::ALL.to_vec());
    }

    #[test]
    fn complete_saturates() {
        assert_eq!(WorkflowPhase::Complete.next(), WorkflowPhase::Complete);
    }

    #[test]
    fn ordering_matches_sequence() {
        for pair in WorkflowPhase::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].next(), pair[1]);
        }
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&WorkflowPhase::Implementation).unwrap();
        assert_eq!(json, "\"implementation\"");
        let back: WorkflowPhase = serde_json::from_str("\"deployment\"").unwrap();
        assert_eq!(back, WorkflowPhase::Deployment);
    }

    #[test]
    fn display_matches_wire_name() {
        for phase in WorkflowPhase::ALL {
            assert_eq!(phase.to_string(), phase.as_str());
        }
    }
}
