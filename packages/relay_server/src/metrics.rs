//! Server metrics for observability
//!
//! Counters for connections, membership changes and relay traffic.

use relay_core::{BroadcastReport, DropReason, RelayOutcome};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently open WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,

    // Membership metrics
    pub joins: AtomicU64,
    /// Joins that displaced an existing connection for the same participant
    pub reconnects: AtomicU64,
    pub leaves: AtomicU64,
    /// Removals requested through the stop endpoint
    pub admin_stops: AtomicU64,

    // Frame metrics
    /// Text frames received from participants
    pub frames_received: AtomicU64,
    /// Signaling frames delivered to their target
    pub frames_relayed: AtomicU64,
    pub dropped_malformed: AtomicU64,
    pub dropped_unknown_kind: AtomicU64,
    pub dropped_no_target: AtomicU64,
    pub dropped_target_absent: AtomicU64,
    pub dropped_send_failed: AtomicU64,

    // Notification metrics
    /// Join/leave notifications delivered
    pub notifications_sent: AtomicU64,
    /// Join/leave notifications that could not be delivered
    pub notifications_failed: AtomicU64,

    // Error metrics
    pub websocket_errors: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    // Membership tracking
    pub fn participant_joined(&self, replaced: bool, notified: BroadcastReport) {
        self.joins.fetch_add(1, Ordering::Relaxed);
        if replaced {
            self.reconnects.fetch_add(1, Ordering::Relaxed);
        }
        self.notifications(notified);
    }

    pub fn participant_left(&self, notified: BroadcastReport) {
        self.leaves.fetch_add(1, Ordering::Relaxed);
        self.notifications(notified);
    }

    pub fn admin_stop(&self, notified: BroadcastReport) {
        self.admin_stops.fetch_add(1, Ordering::Relaxed);
        self.participant_left(notified);
    }

    fn notifications(&self, report: BroadcastReport) {
        self.notifications_sent
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.notifications_failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    // Frame tracking
    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relay(&self, outcome: RelayOutcome) {
        let counter = match outcome {
            RelayOutcome::Delivered => &self.frames_relayed,
            RelayOutcome::Dropped(DropReason::Malformed) => &self.dropped_malformed,
            RelayOutcome::Dropped(DropReason::UnknownKind) => &self.dropped_unknown_kind,
            RelayOutcome::Dropped(DropReason::NoTarget) => &self.dropped_no_target,
            RelayOutcome::Dropped(DropReason::TargetAbsent) => &self.dropped_target_absent,
            RelayOutcome::Dropped(DropReason::SendFailed) => &self.dropped_send_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    // Error tracking
    pub fn websocket_error(&self) {
        self.websocket_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: load(&self.active_connections),
                total: load(&self.total_connections),
            },
            membership: MembershipMetrics {
                joins: load(&self.joins),
                reconnects: load(&self.reconnects),
                leaves: load(&self.leaves),
                admin_stops: load(&self.admin_stops),
            },
            frames: FrameMetrics {
                received: load(&self.frames_received),
                relayed: load(&self.frames_relayed),
                dropped: DroppedFrames {
                    malformed: load(&self.dropped_malformed),
                    unknown_kind: load(&self.dropped_unknown_kind),
                    no_target: load(&self.dropped_no_target),
                    target_absent: load(&self.dropped_target_absent),
                    send_failed: load(&self.dropped_send_failed),
                },
            },
            notifications: NotificationMetrics {
                sent: load(&self.notifications_sent),
                failed: load(&self.notifications_failed),
            },
            errors: ErrorMetrics {
                websocket: load(&self.websocket_errors),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub membership: MembershipMetrics,
    pub frames: FrameMetrics,
    pub notifications: NotificationMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipMetrics {
    pub joins: u64,
    pub reconnects: u64,
    pub leaves: u64,
    pub admin_stops: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub received: u64,
    pub relayed: u64,
    pub dropped: DroppedFrames,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroppedFrames {
    pub malformed: u64,
    pub unknown_kind: u64,
    pub no_target: u64,
    pub target_absent: u64,
    pub send_failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMetrics {
    pub sent: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub websocket: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub sessions: u64,
    pub connections: u64,
    pub uptime_secs: u64,
}
