//! # consult-runtime
//!
//! Workflow state for the consultation server.
//!
//! - **Transition**: pure function from (instance, feedback) to the next
//!   instance plus a [`Transition`] summary. Only approval advances the phase.
//! - **State machine**: [`WorkflowStateMachine`] owns every live
//!   [`WorkflowInstance`](consult_core::WorkflowInstance) behind one async
//!   mutex per workflow, so mutation is serialized per workflow and never
//!   globally.

#![deny(unsafe_code)]

pub mod errors;
pub mod machine;
pub mod transition;

pub use errors::RuntimeError;
pub use machine::{FeedbackOutcome, WorkflowGuard, WorkflowStateMachine};
pub use transition::{Transition, apply_feedback, next_phase, next_step_message, progress_for};
