//! WebSocket Handler
//!
//! Per-connection control loop driving the relay engine.

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use relay_core::{
    ConnectionHandle, ConnectionLifecycle, LifecycleState, Notice, Outbound, RelayEngine,
};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::metrics::ServerMetrics;

/// Everything one participant connection needs.
#[derive(Clone)]
pub struct SessionConnection {
    pub session_id: String,
    pub participant_id: String,
    pub engine: Arc<RelayEngine>,
    pub relay_config: Arc<RelayConfig>,
    pub metrics: Arc<ServerMetrics>,
}

/// Handle an upgraded participant WebSocket until it closes.
pub async fn handle_session_ws(socket: WebSocket, connection: SessionConnection) {
    let (ws_sender, ws_receiver) = socket.split();
    connection.run(ws_sender, ws_receiver).await;
}

impl SessionConnection {
    /// Drive `Connecting -> Joined -> Closing -> Closed` over any message
    /// sink/stream pair. Returns the final state, which is always `Closed`.
    pub async fn run<Si, St, E>(self, mut sink: Si, mut stream: St) -> LifecycleState
    where
        Si: Sink<Message> + Unpin,
        Si::Error: Display,
        St: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let Self {
            session_id,
            participant_id,
            engine,
            relay_config,
            metrics,
        } = self;

        let lifecycle = ConnectionLifecycle::new();
        metrics.connection_opened();

        let (handle, mut outbox) = ConnectionHandle::channel(
            relay_config.send_channel_capacity,
            relay_config.send_timeout,
        );
        let connection_id = handle.id();
        info!(
            session = %session_id,
            participant = %participant_id,
            "New session WebSocket connection ({})",
            connection_id
        );

        let joined = engine
            .join(&session_id, &participant_id, handle.clone())
            .await;
        lifecycle.mark_joined();
        metrics.participant_joined(joined.replaced, joined.notified);

        // The ack goes out before the outbox is drained so it is always the
        // first frame; anything relayed to us meanwhile waits in the queue.
        let ack = Notice::JoinAck {
            success: true,
            session_id: session_id.clone(),
            id: participant_id.clone(),
            count: joined.count,
            participants: joined.participants,
        };
        let ack_sent = match send_frame(&mut sink, &ack.into()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(session = %session_id, participant = %participant_id, "Failed to send join ack: {}", e);
                metrics.websocket_error();
                false
            }
        };

        if ack_sent {
            // Task to send queued frames to the WebSocket
            let writer = async {
                while let Some(frame) = outbox.recv().await {
                    if let Err(e) = send_frame(&mut sink, &frame).await {
                        debug!(participant = %participant_id, "WebSocket send failed: {}", e);
                        return;
                    }
                }
                // Closed by the engine: stopped by an administrator or
                // replaced by a newer connection.
                let _ = sink.send(Message::Close(None)).await;
            };

            // Task to handle incoming frames
            let reader = async {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            metrics.frame_received();
                            let outcome = engine
                                .relay(&session_id, &participant_id, text.as_str())
                                .await;
                            metrics.record_relay(outcome);
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!(participant = %participant_id, "WebSocket receive error: {}", e);
                            metrics.websocket_error();
                            break;
                        }
                    }
                }
            };

            tokio::select! {
                _ = writer => debug!(participant = %participant_id, "Writer finished"),
                _ = reader => debug!(participant = %participant_id, "Reader finished"),
            }
        }

        if lifecycle.begin_closing() {
            if let Some(report) = engine
                .leave_connection(&session_id, &participant_id, connection_id)
                .await
            {
                metrics.participant_left(report);
            }
            handle.close();
            lifecycle.mark_closed();
        }
        metrics.connection_closed();
        info!(
            session = %session_id,
            participant = %participant_id,
            "Session WebSocket closed ({})",
            connection_id
        );
        lifecycle.state()
    }
}

async fn send_frame<Si>(sink: &mut Si, frame: &Outbound) -> Result<(), String>
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let json = frame.to_json().map_err(|e| {
        error!("Failed to serialize frame: {}", e);
        e.to_string()
    })?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| e.to_string())
}
