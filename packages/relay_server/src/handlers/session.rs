//! Administrative session endpoints.
//!
//! Every response is HTTP 200 with an explicit `success` flag; failures are
//! reported in the body.

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde_json::json;
use tracing::info;

use crate::AppState;

/// Number of participants in a session
pub async fn session_count_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.engine.session_count(&session_id).await {
        Some(count) => Json(json!({ "success": true, "count": count })),
        None => Json(json!({ "success": false, "error": "Session not found" })),
    }
}

/// Remove a participant from a session on behalf of an operator
pub async fn stop_session_handler(
    State(state): State<AppState>,
    Path((session_id, participant_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.engine.stop_session(&session_id, &participant_id).await {
        Ok(report) => {
            state.metrics.admin_stop(report);
            info!(
                session = %session_id,
                participant = %participant_id,
                "Participant removed by stop request"
            );
            Json(json!({ "success": true, "message": "User left session" }))
        }
        Err(e) => {
            info!(
                session = %session_id,
                participant = %participant_id,
                "Stop request rejected: {}",
                e
            );
            Json(json!({ "success": false, "error": e.to_string() }))
        }
    }
}

/// Training plan for a session
pub async fn training_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "session": state.catalog.get(&session_id),
    }))
}
