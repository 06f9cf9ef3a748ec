//! The phase transition function.
//!
//! [`apply_feedback`] is the only way a workflow's phase, progress, or
//! feedback history changes. It is synchronous and side-effect free apart
//! from the instance it mutates and a `warn!` on degenerate input.

use chrono::Utc;
use consult_core::{Feedback, FeedbackEvent, FeedbackKind, WorkflowInstance, WorkflowPhase};
use serde_json::Number;
use tracing::warn;

/// Valid rating range, inclusive.
const RATING_RANGE: std::ops::RangeInclusive<u8> = 1..=5;

/// Static progress table.
pub fn progress_for(phase: WorkflowPhase) -> u8 {
    match phase {
        WorkflowPhase::Initialization => 0,
        WorkflowPhase::Requirements => 20,
        WorkflowPhase::Architecture => 40,
        WorkflowPhase::Implementation => 60,
        WorkflowPhase::Testing => 80,
        WorkflowPhase::Deployment => 90,
        WorkflowPhase::Complete => 100,
    }
}

/// Phase after feedback of `kind` arrives in `phase`.
pub fn next_phase(phase: WorkflowPhase, kind: FeedbackKind) -> WorkflowPhase {
    match kind {
        FeedbackKind::Approval => phase.next(),
        FeedbackKind::Modification | FeedbackKind::Clarification => phase,
    }
}

/// What the user should do next while the workflow sits in `phase`.
pub fn next_step_message(phase: WorkflowPhase) -> &'static str {
    match phase {
        WorkflowPhase::Initialization => "Describe your project to begin requirements gathering",
        WorkflowPhase::Requirements => "Review the captured requirements and approve to continue",
        WorkflowPhase::Architecture => "Review the proposed architecture and approve to continue",
        WorkflowPhase::Implementation => "Review the implementation plan and approve to continue",
        WorkflowPhase::Testing => "Review the test strategy and approve to continue",
        WorkflowPhase::Deployment => "Review the deployment plan and approve to finish",
        WorkflowPhase::Complete => "Consultation complete",
    }
}

/// Summary of one applied feedback event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Phase when the feedback arrived.
    pub old_phase: WorkflowPhase,
    /// Phase after the feedback was applied.
    pub new_phase: WorkflowPhase,
    /// Progress after the feedback was applied.
    pub progress_percentage: u8,
    /// The input was malformed and was recovered without a phase change.
    pub degenerate: bool,
    /// Guidance for the new phase.
    pub next_step: &'static str,
}

impl Transition {
    /// Whether the phase moved.
    pub fn phase_changed(&self) -> bool {
        self.old_phase != self.new_phase
    }
}

/// Apply `feedback` to `workflow`.
///
/// The event is always appended to the history, tagged with the phase that
/// was active when it arrived. An unrecognised kind is treated as a
/// clarification and a rating that is not an integer in 1–5 is dropped;
/// either marks the transition degenerate.
pub fn apply_feedback(workflow: &mut WorkflowInstance, feedback: &Feedback) -> Transition {
    let resolved = FeedbackKind::resolve(&feedback.kind);
    let rating = feedback
        .rating
        .as_ref()
        .and_then(Number::as_u64)
        .and_then(|r| u8::try_from(r).ok())
        .filter(|r| RATING_RANGE.contains(r));
    let bad_rating = feedback.rating.is_some() && rating.is_none();
    let degenerate = resolved.degenerate || bad_rating;

    if degenerate {
        warn!(
            workflow_id = %workflow.id,
            phase = %workflow.phase,
            kind = %feedback.kind,
            rating = ?feedback.rating,
            "degenerate feedback, recorded as clarification"
        );
    }

    let old_phase = workflow.phase;
    let now = Utc::now();
    workflow.feedback_history.push(FeedbackEvent {
        kind: resolved.kind,
        raw_kind: resolved.degenerate.then(|| feedback.kind.clone()),
        content: feedback.content.clone(),
        rating,
        timestamp: now,
        phase: old_phase,
    });

    let new_phase = next_phase(old_phase, resolved.kind);
    workflow.phase = new_phase;
    workflow.progress_percentage = workflow.progress_percentage.max(progress_for(new_phase));
    workflow.updated_at = now;

    Transition {
        old_phase,
        new_phase,
        progress_percentage: workflow.progress_percentage,
        degenerate,
        next_step: next_step_message(new_phase),
    }
}
