//! Relay Core - Session membership and signaling relay
//!
//! Participants that share a session id find each other and exchange
//! offer/answer/candidate frames through the relay. The server never looks
//! inside a signaling payload; it only stamps the sender and routes by `to`.
//!
//! This crate has no transport dependencies. A server owns the socket, gives
//! the engine a [`ConnectionHandle`] per connection and drains the matching
//! [`Outbox`] onto the wire.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use relay_core::{ConnectionHandle, RelayEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = RelayEngine::new();
//!
//!     let (alice, _alice_out) = ConnectionHandle::channel(100, Duration::from_secs(5));
//!     let (bob, mut bob_out) = ConnectionHandle::channel(100, Duration::from_secs(5));
//!     engine.join("room", "alice", alice).await;
//!     engine.join("room", "bob", bob).await;
//!
//!     engine
//!         .relay("room", "alice", r#"{"type":"offer","to":"bob","sdp":"v=0"}"#)
//!         .await;
//!
//!     while let Some(frame) = bob_out.recv().await {
//!         println!("bob <- {}", frame.to_json().unwrap());
//!     }
//! }
//! ```

mod connection;
mod engine;
mod lifecycle;
pub mod protocol;
mod registry;

pub use connection::{ConnectionHandle, ConnectionId, Outbox, SendError};
pub use engine::{
    BroadcastReport, DropReason, JoinResult, RelayEngine, RelayOutcome, StopError,
};
pub use lifecycle::{ConnectionLifecycle, LifecycleState};
pub use protocol::{FrameError, Notice, Outbound, RelayMessage, SignalKind};
pub use registry::{Admission, Peer, Removal, SessionRegistry};
