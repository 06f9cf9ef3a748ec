//! # consult-server
//!
//! Axum HTTP + `WebSocket` server for consultation workflows.
//!
//! - REST endpoints: create/inspect workflows, submit feedback, record phase
//!   outputs, connection stats, health, Prometheus metrics
//! - `WebSocket` gateway at `/ws/{workflow_id}`: per-workflow observer
//!   registry, ordered broadcasts, state recovery on (re)connect
//! - Liveness supervisor: periodic heartbeats and eviction of silent peers
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod health;
pub mod metrics;
pub mod orchestration;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use orchestration::{ConnectionStats, OrchestrationError, OrchestrationService};
pub use server::{AppState, ConsultServer};
