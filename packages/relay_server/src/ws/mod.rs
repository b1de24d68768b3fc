//! Session WebSocket
//!
//! One connection per participant: joins on connect, relays signaling frames
//! while open and leaves exactly once on the way out.

mod handler;

pub use handler::{SessionConnection, handle_session_ws};
