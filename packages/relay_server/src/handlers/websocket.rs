use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::ws::{self, SessionConnection};

/// Participant WebSocket: joins `session_id` as `participant_id` on upgrade.
pub async fn session_websocket_handler(
    State(state): State<AppState>,
    Path((session_id, participant_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    if session_id.is_empty() || participant_id.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let connection = SessionConnection {
        session_id,
        participant_id,
        engine: state.engine.clone(),
        relay_config: state.relay_config.clone(),
        metrics: state.metrics.clone(),
    };

    ws.max_message_size(state.relay_config.max_frame_bytes)
        .on_upgrade(move |socket| ws::handle_session_ws(socket, connection))
}
