//! REST endpoints for the active workflow.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::session::WorkflowSession;

/// Shared state for workflow routes.
#[derive(Clone)]
pub struct WorkflowRouteState {
    pub session: Arc<WorkflowSession>,
}

fn not_active() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "No workflow is active"})),
    )
        .into_response()
}

/// GET /api/workflow/status
///
/// Mode, definition id, the instance and its current step.
async fn get_status(State(state): State<WorkflowRouteState>) -> Response {
    match state.session.status().await {
        Some(status) => Json(status).into_response(),
        None => not_active(),
    }
}

/// GET /api/workflow/timeline
async fn get_timeline(State(state): State<WorkflowRouteState>) -> Response {
    if !state.session.is_active().await {
        return not_active();
    }
    Json(state.session.timeline().timeline().await).into_response()
}

/// GET /api/workflow/payloads
///
/// Pending (unconfirmed) payloads keyed by kind.
async fn get_payloads(State(state): State<WorkflowRouteState>) -> Response {
    if !state.session.is_active().await {
        return not_active();
    }
    Json(state.session.pending_payloads().await).into_response()
}

/// Build the workflow REST routes.
pub fn workflow_routes(state: WorkflowRouteState) -> Router {
    Router::new()
        .route("/api/workflow/status", get(get_status))
        .route("/api/workflow/timeline", get(get_timeline))
        .route("/api/workflow/payloads", get(get_payloads))
        .with_state(state)
}
