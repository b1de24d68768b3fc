//! Relay Engine
//!
//! Join/leave lifecycle and message routing on top of the [`SessionRegistry`].
//! Delivery is best effort: a counterpart may come or go at any moment, so a
//! missing target or a failed send is dropped rather than reported.

use futures::future::join_all;
use tracing::{debug, info};

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::protocol::{FrameError, Notice, Outbound, RelayMessage};
use crate::registry::{Peer, Removal, SessionRegistry};

/// What a joining participant learns about the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinResult {
    /// Every member including the joiner, in join order.
    pub participants: Vec<String>,
    pub count: usize,
    /// Whether an older connection with the same id was displaced and closed.
    pub replaced: bool,
    pub notified: BroadcastReport,
}

/// Per-recipient tally of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Why a relayed frame was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Not JSON, or not shaped like a signaling message.
    Malformed,
    /// A `type` this server does not relay.
    UnknownKind,
    /// No `to` field, or an empty one.
    NoTarget,
    /// The addressed participant is not in the sender's session.
    TargetAbsent,
    /// The target's connection closed or stalled during delivery.
    SendFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    Dropped(DropReason),
}

/// Failures reported to the administrative caller of [`RelayEngine::stop_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StopError {
    #[error("Session not found")]
    SessionNotFound,
    #[error("ID not in session")]
    NotInSession,
}

#[derive(Debug, Default)]
pub struct RelayEngine {
    registry: SessionRegistry,
}

impl RelayEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Register a participant and tell everyone already present.
    ///
    /// Never fails: the session is created if needed, and an existing
    /// connection with the same id is replaced and closed.
    pub async fn join(
        &self,
        session_id: &str,
        participant_id: &str,
        handle: ConnectionHandle,
    ) -> JoinResult {
        let admission = self
            .registry
            .add_member(session_id, participant_id, handle)
            .await;

        let replaced = match admission.replaced {
            Some(previous) => {
                info!(
                    session = session_id,
                    participant = participant_id,
                    "Participant reconnected, closing {}",
                    previous.id()
                );
                previous.close();
                true
            }
            None => false,
        };

        let count = admission.members.len();
        info!(
            session = session_id,
            participant = participant_id,
            "Participant joined ({} in session)",
            count
        );

        let notice = Notice::JoinNotification {
            id: participant_id.to_string(),
            count,
        };
        let notified = deliver_all(&admission.peers, notice.into()).await;

        JoinResult {
            participants: admission.members,
            count,
            replaced,
            notified,
        }
    }

    /// Remove a participant, close its handle and tell the remaining members.
    ///
    /// Returns `None` (and does nothing) when the participant was not a member.
    pub async fn leave(&self, session_id: &str, participant_id: &str) -> Option<BroadcastReport> {
        let removal = self.registry.remove_member(session_id, participant_id).await;
        self.finish_leave(session_id, participant_id, removal)
            .await
            .ok()
            .flatten()
    }

    /// Leave on behalf of one specific connection.
    ///
    /// A no-op once that connection has been superseded by a reconnect or
    /// already removed by an administrative stop, which keeps the leave
    /// notification to exactly one per departure.
    pub async fn leave_connection(
        &self,
        session_id: &str,
        participant_id: &str,
        connection: ConnectionId,
    ) -> Option<BroadcastReport> {
        let removal = self
            .registry
            .remove_connection(session_id, participant_id, connection)
            .await;
        self.finish_leave(session_id, participant_id, removal)
            .await
            .ok()
            .flatten()
    }

    /// Out-of-band removal requested by an administrator.
    pub async fn stop_session(
        &self,
        session_id: &str,
        participant_id: &str,
    ) -> Result<BroadcastReport, StopError> {
        let removal = self.registry.remove_member(session_id, participant_id).await;
        self.finish_leave(session_id, participant_id, removal)
            .await?
            .ok_or(StopError::NotInSession)
    }

    async fn finish_leave(
        &self,
        session_id: &str,
        participant_id: &str,
        removal: Removal,
    ) -> Result<Option<BroadcastReport>, StopError> {
        let (handle, remaining) = match removal {
            Removal::Removed { handle, remaining } => (handle, remaining),
            Removal::SessionMissing => {
                debug!(
                    session = session_id,
                    participant = participant_id,
                    "Leave ignored, session does not exist"
                );
                return Err(StopError::SessionNotFound);
            }
            Removal::ParticipantMissing => {
                debug!(
                    session = session_id,
                    participant = participant_id,
                    "Leave ignored, participant not in session"
                );
                return Ok(None);
            }
        };

        handle.close();

        let count = remaining.len();
        if count == 0 {
            info!(
                session = session_id,
                participant = participant_id,
                "Last participant left, session closed"
            );
            return Ok(Some(BroadcastReport::default()));
        }

        info!(
            session = session_id,
            participant = participant_id,
            "Participant left ({} remaining)",
            count
        );
        let notice = Notice::LeaveNotification {
            id: participant_id.to_string(),
            count,
        };
        Ok(Some(deliver_all(&remaining, notice.into()).await))
    }

    /// Parse a raw frame from `sender_id` and route it.
    pub async fn relay(&self, session_id: &str, sender_id: &str, frame: &str) -> RelayOutcome {
        match RelayMessage::parse(frame) {
            Ok(message) => self.relay_message(session_id, sender_id, message).await,
            Err(FrameError::UnknownKind(kind)) => {
                debug!(
                    session = session_id,
                    participant = sender_id,
                    "Dropping frame of unsupported type {:?}",
                    kind
                );
                RelayOutcome::Dropped(DropReason::UnknownKind)
            }
            Err(e) => {
                debug!(
                    session = session_id,
                    participant = sender_id,
                    "Dropping malformed frame: {}",
                    e
                );
                RelayOutcome::Dropped(DropReason::Malformed)
            }
        }
    }

    /// Deliver a parsed message to its target within the same session.
    pub async fn relay_message(
        &self,
        session_id: &str,
        sender_id: &str,
        message: RelayMessage,
    ) -> RelayOutcome {
        let Some(target) = message.target().map(str::to_owned) else {
            debug!(
                session = session_id,
                participant = sender_id,
                "Dropping {} without target",
                message.kind.as_str()
            );
            return RelayOutcome::Dropped(DropReason::NoTarget);
        };

        // Lock is released here; the send below may wait on a slow reader.
        let Some(handle) = self.registry.get_handle(session_id, &target).await else {
            debug!(
                session = session_id,
                participant = sender_id,
                "Dropping {} for absent participant {}",
                message.kind.as_str(),
                target
            );
            return RelayOutcome::Dropped(DropReason::TargetAbsent);
        };

        let kind = message.kind;
        match handle.send(message.stamped(sender_id)).await {
            Ok(()) => {
                debug!(
                    session = session_id,
                    participant = sender_id,
                    "Relayed {} to {}",
                    kind.as_str(),
                    target
                );
                RelayOutcome::Delivered
            }
            Err(e) => {
                debug!(
                    session = session_id,
                    participant = sender_id,
                    "Dropping {} for {}: {}",
                    kind.as_str(),
                    target,
                    e
                );
                RelayOutcome::Dropped(DropReason::SendFailed)
            }
        }
    }

    /// Send `message` to every member except `exclude_id`.
    pub async fn broadcast_to_all(
        &self,
        session_id: &str,
        exclude_id: Option<&str>,
        message: impl Into<Outbound>,
    ) -> BroadcastReport {
        let peers = self.registry.peers(session_id, exclude_id).await;
        deliver_all(&peers, message.into()).await
    }

    /// Member count, or `None` when the session does not exist.
    pub async fn session_count(&self, session_id: &str) -> Option<usize> {
        self.registry.member_count(session_id).await
    }
}

/// Send to every peer concurrently. A failure on one recipient does not hold
/// up or abort the others.
async fn deliver_all(peers: &[Peer], frame: Outbound) -> BroadcastReport {
    let sends = peers.iter().map(|peer| {
        let frame = frame.clone();
        async move { (peer, peer.handle.send(frame).await) }
    });

    let mut report = BroadcastReport::default();
    for (peer, result) in join_all(sends).await {
        match result {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                debug!(participant = %peer.id, "Broadcast delivery failed: {}", e);
                report.failed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbox;
    use crate::protocol::SignalKind;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;

    fn connection() -> (ConnectionHandle, Outbox) {
        ConnectionHandle::channel(16, Duration::from_secs(1))
    }

    fn drain(outbox: &mut Outbox) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Some(frame) = outbox.try_recv() {
            frames.push(serde_json::from_str(&frame.to_json().unwrap()).unwrap());
        }
        frames
    }

    /// Engine with `a` and `b` joined to `s1`; outboxes already drained.
    async fn pair() -> (RelayEngine, Outbox, Outbox) {
        let engine = RelayEngine::new();
        let (a, mut a_rx) = connection();
        let (b, mut b_rx) = connection();
        engine.join("s1", "a", a).await;
        engine.join("s1", "b", b).await;
        drain(&mut a_rx);
        drain(&mut b_rx);
        (engine, a_rx, b_rx)
    }

    #[tokio::test]
    async fn test_join_notifies_existing_members_only() {
        let engine = RelayEngine::new();
        let (a, mut a_rx) = connection();
        let (b, mut b_rx) = connection();

        let first = engine.join("s1", "a", a).await;
        assert_eq!(first.participants, vec!["a"]);
        assert_eq!(first.count, 1);
        assert_eq!(first.notified, BroadcastReport::default());

        let second = engine.join("s1", "b", b).await;
        assert_eq!(second.participants, vec!["a", "b"]);
        assert_eq!(second.count, 2);
        assert!(!second.replaced);
        assert_eq!(second.notified.delivered, 1);

        assert_eq!(
            drain(&mut a_rx),
            vec![json!({"type": "join_notification", "id": "b", "count": 2})]
        );
        assert!(drain(&mut b_rx).is_empty());
        engine.registry().assert_consistent().await;
    }

    #[tokio::test]
    async fn test_relay_offer_to_target_only() {
        let engine = RelayEngine::new();
        let (a, mut a_rx) = connection();
        let (b, mut b_rx) = connection();
        let (c, mut c_rx) = connection();
        engine.join("s1", "a", a).await;
        engine.join("s1", "b", b).await;
        engine.join("s1", "c", c).await;
        drain(&mut a_rx);
        drain(&mut b_rx);
        drain(&mut c_rx);

        let outcome = engine
            .relay("s1", "a", r#"{"type":"offer","to":"b","payload":"X"}"#)
            .await;
        assert_eq!(outcome, RelayOutcome::Delivered);

        assert_eq!(
            drain(&mut b_rx),
            vec![json!({"type": "offer", "from": "a", "to": "b", "payload": "X"})]
        );
        assert!(drain(&mut a_rx).is_empty());
        assert!(drain(&mut c_rx).is_empty());
    }

    #[tokio::test]
    async fn test_relay_overwrites_spoofed_sender() {
        let (engine, _a_rx, mut b_rx) = pair().await;
        engine
            .relay("s1", "a", r#"{"type":"answer","to":"b","from":"b","sdp":"x"}"#)
            .await;
        let frames = drain(&mut b_rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["from"], "a");
        assert_eq!(frames[0]["sdp"], "x");
    }

    #[tokio::test]
    async fn test_relay_to_absent_target_is_dropped() {
        let (engine, mut a_rx, mut b_rx) = pair().await;
        let outcome = engine
            .relay("s1", "a", r#"{"type":"offer","to":"c"}"#)
            .await;
        assert_eq!(outcome, RelayOutcome::Dropped(DropReason::TargetAbsent));
        assert!(drain(&mut a_rx).is_empty());
        assert!(drain(&mut b_rx).is_empty());
    }

    #[tokio::test]
    async fn test_relay_does_not_cross_sessions() {
        let (engine, _a_rx, mut b_rx) = pair().await;
        let (x, mut x_rx) = connection();
        engine.join("s2", "x", x).await;

        let outcome = engine
            .relay("s1", "a", r#"{"type":"candidate","to":"x"}"#)
            .await;
        assert_eq!(outcome, RelayOutcome::Dropped(DropReason::TargetAbsent));
        assert!(drain(&mut x_rx).is_empty());
        assert!(drain(&mut b_rx).is_empty());
    }

    #[tokio::test]
    async fn test_relay_drops_bad_frames() {
        let (engine, _a_rx, mut b_rx) = pair().await;
        let cases = [
            ("garbage", DropReason::Malformed),
            (r#"{"to":"b"}"#, DropReason::Malformed),
            (r#"{"type":"offer","to":{"id":"b"}}"#, DropReason::Malformed),
            (r#"{"type":"hello","to":"b"}"#, DropReason::UnknownKind),
            (r#"{"type":"leave_notification","to":"b"}"#, DropReason::UnknownKind),
            (r#"{"type":"offer"}"#, DropReason::NoTarget),
            (r#"{"type":"offer","to":""}"#, DropReason::NoTarget),
        ];
        for (frame, reason) in cases {
            assert_eq!(
                engine.relay("s1", "a", frame).await,
                RelayOutcome::Dropped(reason),
                "frame: {frame}"
            );
        }
        assert!(drain(&mut b_rx).is_empty());
    }

    #[tokio::test]
    async fn test_relay_message_to_closed_handle() {
        let (engine, _a_rx, b_rx) = pair().await;
        drop(b_rx);
        let message = RelayMessage {
            kind: SignalKind::Candidate,
            to: Some("b".into()),
            from: None,
            payload: Default::default(),
        };
        assert_eq!(
            engine.relay_message("s1", "a", message).await,
            RelayOutcome::Dropped(DropReason::SendFailed)
        );
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining_and_closes_handle() {
        let engine = RelayEngine::new();
        let (a, mut a_rx) = connection();
        let (b, mut b_rx) = connection();
        engine.join("s1", "a", a.clone()).await;
        engine.join("s1", "b", b).await;
        drain(&mut a_rx);

        assert!(engine.leave("s1", "a").await.is_some());
        assert!(a.is_closed());
        assert_eq!(
            drain(&mut b_rx),
            vec![json!({"type": "leave_notification", "id": "a", "count": 1})]
        );
        assert_eq!(engine.registry().list_members("s1").await, vec!["b"]);
        engine.registry().assert_consistent().await;
    }

    #[tokio::test]
    async fn test_leave_twice_is_noop() {
        let (engine, _a_rx, mut b_rx) = pair().await;
        assert!(engine.leave("s1", "a").await.is_some());
        assert!(engine.leave("s1", "a").await.is_none());
        assert_eq!(drain(&mut b_rx).len(), 1);
        assert_eq!(engine.session_count("s1").await, Some(1));
    }

    #[tokio::test]
    async fn test_last_leave_removes_session() {
        let engine = RelayEngine::new();
        let (a, _a_rx) = connection();
        engine.join("s1", "a", a).await;
        assert_eq!(engine.session_count("s1").await, Some(1));

        assert!(engine.leave("s1", "a").await.is_some());
        assert_eq!(engine.session_count("s1").await, None);
        assert!(!engine.registry().session_exists("s1").await);
        assert!(engine.leave("s1", "a").await.is_none());
    }

    #[tokio::test]
    async fn test_stop_session_errors() {
        let (engine, _a_rx, _b_rx) = pair().await;
        assert_eq!(
            engine.stop_session("nope", "a").await,
            Err(StopError::SessionNotFound)
        );
        assert_eq!(
            engine.stop_session("s1", "zz").await,
            Err(StopError::NotInSession)
        );
        assert_eq!(StopError::SessionNotFound.to_string(), "Session not found");
        assert_eq!(StopError::NotInSession.to_string(), "ID not in session");
    }

    #[tokio::test]
    async fn test_stop_session_removes_and_notifies() {
        let (engine, _a_rx, mut b_rx) = pair().await;
        let report = engine.stop_session("s1", "a").await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(
            drain(&mut b_rx),
            vec![json!({"type": "leave_notification", "id": "a", "count": 1})]
        );
        assert_eq!(
            engine.stop_session("s1", "a").await,
            Err(StopError::NotInSession)
        );
    }

    #[tokio::test]
    async fn test_stop_racing_disconnect_leaves_once() {
        for _ in 0..50 {
            let engine = Arc::new(RelayEngine::new());
            let (a, _a_rx) = connection();
            let (b, mut b_rx) = connection();
            let a_id = a.id();
            engine.join("s1", "a", a.clone()).await;
            engine.join("s1", "b", b).await;

            let stop = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.stop_session("s1", "a").await })
            };
            let disconnect = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.leave_connection("s1", "a", a_id).await })
            };
            let stopped = stop.await.unwrap().is_ok();
            let left = disconnect.await.unwrap().is_some();

            assert!(stopped ^ left, "exactly one path must perform the removal");
            assert!(a.is_closed());
            let leaves: Vec<_> = drain(&mut b_rx)
                .into_iter()
                .filter(|f| f["type"] == "leave_notification")
                .collect();
            assert_eq!(leaves, vec![json!({"type": "leave_notification", "id": "a", "count": 1})]);
            engine.registry().assert_consistent().await;
        }
    }

    #[tokio::test]
    async fn test_reconnect_closes_previous_connection() {
        let (engine, mut a_rx, mut b_rx) = pair().await;
        let old = engine.registry().get_handle("s1", "a").await.unwrap();
        let (fresh, _fresh_rx) = connection();

        let result = engine.join("s1", "a", fresh.clone()).await;
        assert!(result.replaced);
        assert_eq!(result.participants, vec!["a", "b"]);
        assert!(old.is_closed());
        assert_eq!(a_rx.recv().await, None);
        assert_eq!(
            drain(&mut b_rx),
            vec![json!({"type": "join_notification", "id": "a", "count": 2})]
        );

        // The superseded connection's own cleanup must not evict the new one.
        assert!(engine.leave_connection("s1", "a", old.id()).await.is_none());
        assert!(drain(&mut b_rx).is_empty());
        let current = engine.registry().get_handle("s1", "a").await.unwrap();
        assert_eq!(current.id(), fresh.id());
    }

    #[tokio::test]
    async fn test_broadcast_continues_past_failed_recipient() {
        let engine = RelayEngine::new();
        let (a, _a_rx) = connection();
        let (b, b_rx) = connection();
        let (c, mut c_rx) = connection();
        engine.join("s1", "a", a).await;
        engine.join("s1", "b", b.clone()).await;
        engine.join("s1", "c", c).await;
        drop(b_rx);
        b.close();
        drain(&mut c_rx);

        let notice = Notice::JoinNotification {
            id: "z".into(),
            count: 3,
        };
        let report = engine.broadcast_to_all("s1", Some("a"), notice).await;
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert_eq!(drain(&mut c_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_not_blocked_by_stalled_recipient() {
        let engine = RelayEngine::new();
        let (slow, _slow_rx) = ConnectionHandle::channel(1, Duration::from_millis(50));
        let (fast, mut fast_rx) = connection();
        engine.join("s1", "slow", slow.clone()).await;
        engine.join("s1", "fast", fast).await;
        drain(&mut fast_rx);
        // The join notice for "fast" already fills the slow reader's queue.

        let notice = Notice::LeaveNotification {
            id: "y".into(),
            count: 2,
        };
        let report = tokio::time::timeout(
            Duration::from_secs(1),
            engine.broadcast_to_all("s1", None, notice),
        )
        .await
        .expect("broadcast must be bounded by the send timeout");
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert_eq!(drain(&mut fast_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_to_missing_session() {
        let engine = RelayEngine::new();
        let notice = Notice::JoinNotification {
            id: "z".into(),
            count: 1,
        };
        assert_eq!(
            engine.broadcast_to_all("ghost", None, notice).await,
            BroadcastReport::default()
        );
    }
}
