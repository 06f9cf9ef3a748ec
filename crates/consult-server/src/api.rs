//! REST handlers for workflows and connection introspection.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use consult_core::{Feedback, SessionId, WorkflowId, WorkflowInstance, WorkflowPhase};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::orchestration::{ConnectionStats, OrchestrationError};
use crate::server::AppState;

/// HTTP error with a JSON body of the form
/// `{"error": {"code": "...", "message": "..."}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Build an error response.
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<OrchestrationError> for ApiError {
    fn from(e: OrchestrationError) -> Self {
        let status = match e {
            OrchestrationError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestrationError::AtCapacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            OrchestrationError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.category(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": { "code": self.code, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

/// `POST /workflows` body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateWorkflowRequest {
    /// Owning session; defaults to the new workflow's id.
    pub session_id: Option<SessionId>,
    /// Opaque payload stored under the `initialization` output key.
    pub payload: Option<Value>,
}

/// `POST /workflows/{id}/feedback` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackResponse {
    /// Workflow id.
    pub workflow_id: WorkflowId,
    /// Phase after the feedback.
    pub phase: WorkflowPhase,
    /// Progress after the feedback.
    pub progress_percentage: u8,
    /// Guidance for the current phase.
    pub next_step: &'static str,
    /// Whether the feedback moved the phase.
    pub phase_changed: bool,
    /// Whether the input was malformed and recovered.
    pub degenerate: bool,
}

/// `GET /connections` query.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsQuery {
    /// Restrict the `connections` count to one workflow.
    pub workflow_id: Option<WorkflowId>,
}

/// POST /workflows
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkflowRequest>,
) -> (StatusCode, Json<WorkflowInstance>) {
    let workflow = state.service.create_workflow(req.session_id, req.payload);
    (StatusCode::CREATED, Json(workflow))
}

/// GET /workflows/{id}
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<WorkflowId>,
) -> Result<Json<WorkflowInstance>, ApiError> {
    Ok(Json(state.service.snapshot(&id).await?))
}

/// POST /workflows/{id}/feedback
pub async fn submit_feedback(
    State(state): State<AppState>,
    Path(id): Path<WorkflowId>,
    Json(feedback): Json<Feedback>,
) -> Result<Json<FeedbackResponse>, ApiError> {
    let outcome = state.service.submit_feedback(&id, &feedback).await?;
    let t = &outcome.transition;
    Ok(Json(FeedbackResponse {
        workflow_id: outcome.workflow.id.clone(),
        phase: t.new_phase,
        progress_percentage: t.progress_percentage,
        next_step: t.next_step,
        phase_changed: t.phase_changed(),
        degenerate: t.degenerate,
    }))
}

/// PUT /workflows/{id}/outputs/{key}
pub async fn put_phase_output(
    State(state): State<AppState>,
    Path((id, key)): Path<(WorkflowId, String)>,
    Json(output): Json<Value>,
) -> Result<Json<WorkflowInstance>, ApiError> {
    Ok(Json(state.service.record_phase_output(&id, &key, output).await?))
}

/// GET /connections
pub async fn connections(
    State(state): State<AppState>,
    Query(query): Query<ConnectionsQuery>,
) -> Json<ConnectionStats> {
    Json(state.service.stats(query.workflow_id.as_ref()))
}
