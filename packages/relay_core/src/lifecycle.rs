//! Per-connection state: `Connecting -> Joined -> Closing -> Closed`.
//!
//! Transitions are compare-and-swap so the first of several concurrent
//! disconnect triggers wins and the rest observe it and back off.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Connecting = 0,
    Joined = 1,
    Closing = 2,
    Closed = 3,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Joined,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Joined => "joined",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct ConnectionLifecycle {
    state: AtomicU8,
}

impl Default for ConnectionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionLifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Connecting as u8),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Connecting -> Joined`. Fails if the connection already started closing.
    pub fn mark_joined(&self) -> bool {
        self.transition(LifecycleState::Connecting, LifecycleState::Joined)
    }

    /// Enter `Closing` from `Connecting` or `Joined`.
    ///
    /// Returns `true` only for the caller that performed the transition; that
    /// caller owns the cleanup.
    pub fn begin_closing(&self) -> bool {
        self.transition(LifecycleState::Joined, LifecycleState::Closing)
            || self.transition(LifecycleState::Connecting, LifecycleState::Closing)
    }

    /// Terminal. Safe to call more than once.
    pub fn mark_closed(&self) {
        self.state
            .store(LifecycleState::Closed as u8, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.state() == LifecycleState::Closed
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
