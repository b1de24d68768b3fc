use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;
use crate::metrics;

/// Service banner
pub async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Session Relay API",
        "docs": "/health"
    }))
}

/// Health check endpoint - returns server status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.engine.registry().len().await as u64;
    let snapshot = state.metrics.snapshot();

    Json(metrics::HealthStatus {
        status: "ok".to_string(),
        sessions,
        connections: snapshot.connections.active,
        uptime_secs: snapshot.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}
