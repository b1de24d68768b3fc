use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::Outbound;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for one physical connection.
///
/// Two connections may carry the same participant id (a reconnect), so the
/// registry uses this to tell them apart.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Errors that can occur when delivering a frame to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
    #[error("send to connection {0} timed out")]
    TimedOut(ConnectionId),
}

/// Sending half of a participant's channel.
///
/// Cheap to clone; every clone refers to the same connection. Closing any
/// clone closes them all.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    send_timeout: Duration,
}

/// Receiving half, drained by the task that owns the transport.
#[derive(Debug)]
pub struct Outbox {
    rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Create a connected handle/outbox pair.
    ///
    /// `capacity` bounds the frames queued for a slow reader; a zero capacity
    /// is raised to one.
    pub fn channel(capacity: usize, send_timeout: Duration) -> (Self, Outbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let handle = Self {
            id: ConnectionId::next(),
            tx,
            cancel: cancel.clone(),
            send_timeout,
        };
        (handle, Outbox { rx, cancel })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame for delivery.
    ///
    /// Fails fast once the handle is closed, including while waiting for room
    /// in a full queue. Waits at most `send_timeout` for a slow reader.
    pub async fn send(&self, frame: impl Into<Outbound>) -> Result<(), SendError> {
        if self.cancel.is_cancelled() {
            return Err(SendError::Closed(self.id));
        }

        let frame = frame.into();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SendError::Closed(self.id)),
            result = tokio::time::timeout(self.send_timeout, self.tx.send(frame)) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(SendError::Closed(self.id)),
                Err(_) => Err(SendError::TimedOut(self.id)),
            },
        }
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the handle is closed or the outbox has been dropped.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }
}

impl Outbox {
    /// Next queued frame, or `None` once the handle has been closed.
    ///
    /// Frames still queued at close time are discarded.
    pub async fn recv(&mut self) -> Option<Outbound> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            frame = self.rx.recv() => frame,
        }
    }

    /// Non-blocking variant of [`Outbox::recv`] that ignores the close state.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.rx.try_recv().ok()
    }
}
