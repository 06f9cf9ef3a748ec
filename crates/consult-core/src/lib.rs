//! # consult-core
//!
//! Foundation types for the consultation workflow server.
//!
//! - [`ids`]: branded id newtypes (workflow, session, connection, response)
//! - [`phase`]: the closed, ordered [`WorkflowPhase`] enumeration
//! - [`workflow`]: [`WorkflowInstance`], feedback submissions and history
//! - [`message`]: outbound wire envelope and inbound client messages
//! - [`logging`]: `tracing` subscriber setup shared by binaries and tests
//!
//! Phase outputs are carried as opaque [`serde_json::Value`]s and never
//! inspected here.

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod message;
pub mod phase;
pub mod workflow;

pub use ids::{ConnectionId, ResponseId, SessionId, WorkflowId};
pub use message::{ClientMessage, Message, MessagePayload};
pub use phase::WorkflowPhase;
pub use workflow::{Feedback, FeedbackEvent, FeedbackKind, ResolvedKind, WorkflowInstance};
