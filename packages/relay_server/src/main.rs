use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::Parser;
use relay_core::RelayEngine;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod config;
mod handlers;
mod metrics;
mod training;
mod ws;

#[cfg(test)]
mod test_helpers;

use crate::config::{FileConfig, RelayConfig};
use crate::metrics::ServerMetrics;
use crate::training::TrainingCatalog;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Signaling relay for peer-to-peer sessions")]
struct Cli {
    /// Config file (missing file = built-in defaults)
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the web server (overrides config, 0 = auto-select)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    /// Session registry and relay, shared by every connection
    pub engine: Arc<RelayEngine>,
    /// Per-connection tunables
    pub relay_config: Arc<RelayConfig>,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
    pub catalog: Arc<TrainingCatalog>,
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root_handler))
        // Session routes
        .route(
            "/session/ws/{session_id}/{participant_id}",
            get(handlers::session_websocket_handler),
        )
        .route(
            "/session/count/{session_id}",
            get(handlers::session_count_handler),
        )
        .route(
            "/session/stop/{session_id}/{participant_id}",
            get(handlers::stop_session_handler),
        )
        .route(
            "/session/{session_id}",
            get(handlers::training_session_handler),
        )
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "relay=debug,relay_core=debug,tower_http=debug,info"
    } else {
        "relay=info,relay_core=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting session relay");

    let file_config: FileConfig = config::load_config(&cli.config)
        .extract()
        .with_context(|| format!("Invalid configuration in {}", cli.config.display()))?;

    let relay_config = RelayConfig::from_file(&file_config.relay);
    info!(
        "Relay config: queue={} frames, send_timeout={}ms, max_frame={}KB",
        relay_config.send_channel_capacity,
        relay_config.send_timeout.as_millis(),
        relay_config.max_frame_bytes / 1024
    );

    let state = AppState {
        engine: Arc::new(RelayEngine::new()),
        relay_config: Arc::new(relay_config),
        metrics: Arc::new(ServerMetrics::new()),
        catalog: Arc::new(TrainingCatalog::default()),
    };
    let app = build_router(state);

    let host = cli.host.unwrap_or(file_config.server.host);
    let port = cli.port.unwrap_or(file_config.server.port);
    let addr = format!("{}:{}", host, port)
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Session relay listening on http://{}", actual_addr);
    info!("Endpoints:");
    info!("  GET /session/ws/:session/:id     - Join a session (WebSocket)");
    info!("  GET /session/count/:session      - Participant count");
    info!("  GET /session/stop/:session/:id   - Remove a participant");
    info!("  GET /session/:session            - Training plan");
    info!("  GET /health, /health/live, /metrics");

    // Create shutdown signal handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, closing connections...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
