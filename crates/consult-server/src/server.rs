//! `ConsultServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::http::StatusCode;
use consult_core::{SessionId, WorkflowId};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::{self, ApiError};
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::{self as server_metrics, WS_CONNECTIONS_REJECTED_TOTAL};
use crate::orchestration::OrchestrationService;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_ws_session;
use crate::websocket::supervisor::LivenessSupervisor;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Workflow and connection orchestration.
    pub service: Arc<OrchestrationService>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
    /// When the server started.
    pub start_time: Instant,
}

/// The consultation server.
pub struct ConsultServer {
    config: Arc<ServerConfig>,
    service: Arc<OrchestrationService>,
    supervisor: Arc<LivenessSupervisor>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl ConsultServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, metrics: PrometheusHandle) -> Self {
        let service = Arc::new(OrchestrationService::new(&config));
        let supervisor = Arc::new(LivenessSupervisor::new(
            Arc::clone(service.registry()),
            Arc::clone(service.broadcaster()),
            config.liveness_timing(),
        ));
        Self {
            config: Arc::new(config),
            service,
            supervisor,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            service: Arc::clone(&self.service),
            config: Arc::clone(&self.config),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws/{workflow_id}", get(ws_handler))
            .route("/workflows", post(api::create_workflow))
            .route("/workflows/{id}", get(api::get_workflow))
            .route("/workflows/{id}/feedback", post(api::submit_feedback))
            .route("/workflows/{id}/outputs/{key}", put(api::put_phase_output))
            .route("/connections", get(api::connections))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind, start the liveness supervisor, and serve until shutdown.
    ///
    /// Returns the bound address and a handle that resolves once the
    /// server and the supervisor loops have stopped.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();
        let supervisor_handles = self
            .supervisor
            .start(&token)
            .map(|h| h.into_vec())
            .unwrap_or_default();
        let shutdown = Arc::clone(&self.shutdown);

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(e) = served {
                warn!(error = %e, "server error");
            }
            shutdown.graceful_shutdown(supervisor_handles, None).await;
            info!("server stopped");
        });

        info!(%addr, "consult server listening");
        Ok((addr, handle))
    }

    /// The orchestration service.
    pub fn service(&self) -> &Arc<OrchestrationService> {
        &self.service
    }

    /// The liveness supervisor.
    pub fn supervisor(&self) -> &Arc<LivenessSupervisor> {
        &self.supervisor
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.service.registry().count(),
        state.service.workflow_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    server_metrics::render(&state.metrics)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsQuery {
    session_id: Option<SessionId>,
}

/// GET /ws/{workflow_id}
async fn ws_handler(
    State(state): State<AppState>,
    Path(workflow_id): Path<WorkflowId>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    // Cheap early refusal. The registry enforces the limit again when the
    // upgraded connection registers.
    if state.service.registry().count() >= state.config.max_connections {
        metrics::counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        warn!(max = state.config.max_connections, "connection limit reached, refusing upgrade");
        return ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "at_capacity",
            "connection limit reached",
        )
        .into_response();
    }
    let service = Arc::clone(&state.service);
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, service, workflow_id, query.session_id))
}
