pub mod health;
pub mod session;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use health::{health_handler, health_live_handler, metrics_handler, root_handler};
pub use session::{session_count_handler, stop_session_handler, training_session_handler};
pub use websocket::session_websocket_handler;
