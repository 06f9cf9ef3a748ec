//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if another recorder
/// is already installed in this process.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally. Metrics
/// recorded through the facade will not show up in it; used when the
/// process already has a recorder and in tests.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket upgrades refused at the connection limit (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Connections pruned after a failed broadcast send (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Messages fanned out (counter, labels: type).
pub const WS_BROADCASTS_TOTAL: &str = "ws_broadcasts_total";
/// Connections evicted for missing heartbeats (counter).
pub const WS_EVICTIONS_TOTAL: &str = "ws_evictions_total";
/// Workflows created (counter).
pub const WORKFLOWS_CREATED_TOTAL: &str = "workflows_created_total";
/// Phase transitions (counter, labels: from, to).
pub const WORKFLOW_PHASE_TRANSITIONS_TOTAL: &str = "workflow_phase_transitions_total";
/// Feedback recovered from malformed input (counter).
pub const FEEDBACK_DEGENERATE_TOTAL: &str = "feedback_degenerate_total";
/// WebSocket session lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
