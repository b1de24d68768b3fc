//! Session Registry
//!
//! Membership for every live session: the ordered member ids and the
//! connection handle recorded for each of them. Both are kept in one
//! [`Session`] value and only ever changed under the registry's write lock,
//! so they cannot drift apart.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::connection::{ConnectionHandle, ConnectionId};

/// A member's id together with its handle, as seen at lookup time.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: String,
    pub handle: ConnectionHandle,
}

/// Result of [`SessionRegistry::add_member`].
#[derive(Debug)]
pub struct Admission {
    /// All members after the join, in join order.
    pub members: Vec<String>,
    /// Members that were present before the join (the joiner excluded).
    pub peers: Vec<Peer>,
    /// The handle this join displaced when the id was already a member.
    pub replaced: Option<ConnectionHandle>,
}

/// Result of a member removal.
#[derive(Debug)]
pub enum Removal {
    Removed {
        handle: ConnectionHandle,
        /// Members still in the session; empty when the session was deleted.
        remaining: Vec<Peer>,
    },
    SessionMissing,
    ParticipantMissing,
}

#[derive(Debug, Default)]
struct Session {
    members: Vec<String>,
    handles: HashMap<String, ConnectionHandle>,
}

impl Session {
    fn insert(&mut self, participant_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = self.handles.insert(participant_id.to_string(), handle);
        if previous.is_none() {
            self.members.push(participant_id.to_string());
        }
        previous
    }

    fn remove(&mut self, participant_id: &str) -> Option<ConnectionHandle> {
        let handle = self.handles.remove(participant_id)?;
        self.members.retain(|m| m != participant_id);
        Some(handle)
    }

    fn peers(&self, exclude: Option<&str>) -> Vec<Peer> {
        self.members
            .iter()
            .filter(|id| Some(id.as_str()) != exclude)
            .filter_map(|id| {
                self.handles.get(id).map(|handle| Peer {
                    id: id.clone(),
                    handle: handle.clone(),
                })
            })
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Process-wide membership store.
///
/// Handles are cloned out of the lock; callers send on them after the lock is
/// released.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant, creating the session on first use.
    ///
    /// An id that is already a member keeps its position and has its handle
    /// replaced.
    pub async fn add_member(
        &self,
        session_id: &str,
        participant_id: &str,
        handle: ConnectionHandle,
    ) -> Admission {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(session_id.to_string()).or_default();
        let peers = session.peers(Some(participant_id));
        let replaced = session.insert(participant_id, handle);
        Admission {
            members: session.members.clone(),
            peers,
            replaced,
        }
    }

    /// Remove a participant whatever connection it is on.
    pub async fn remove_member(&self, session_id: &str, participant_id: &str) -> Removal {
        self.remove_if(session_id, participant_id, |_| true).await
    }

    /// Remove a participant only while `connection` is still its recorded
    /// handle, so a superseded connection cannot evict its replacement.
    pub async fn remove_connection(
        &self,
        session_id: &str,
        participant_id: &str,
        connection: ConnectionId,
    ) -> Removal {
        self.remove_if(session_id, participant_id, |handle| {
            handle.id() == connection
        })
        .await
    }

    async fn remove_if(
        &self,
        session_id: &str,
        participant_id: &str,
        matches: impl FnOnce(&ConnectionHandle) -> bool,
    ) -> Removal {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(session_id) else {
            return Removal::SessionMissing;
        };
        if !session.handles.get(participant_id).is_some_and(matches) {
            return Removal::ParticipantMissing;
        }
        let Some(handle) = session.remove(participant_id) else {
            return Removal::ParticipantMissing;
        };

        let remaining = session.peers(None);
        if session.is_empty() {
            sessions.remove(session_id);
            debug!(session = session_id, "Session emptied and removed");
        }
        Removal::Removed { handle, remaining }
    }

    pub async fn get_handle(
        &self,
        session_id: &str,
        participant_id: &str,
    ) -> Option<ConnectionHandle> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .and_then(|s| s.handles.get(participant_id).cloned())
    }

    /// Member ids in join order; empty when the session does not exist.
    pub async fn list_members(&self, session_id: &str) -> Vec<String> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.members.clone())
            .unwrap_or_default()
    }

    /// Members with their handles, optionally leaving one id out.
    pub async fn peers(&self, session_id: &str, exclude: Option<&str>) -> Vec<Peer> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.peers(exclude))
            .unwrap_or_default()
    }

    pub async fn session_exists(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// `None` distinguishes a session that does not exist from an empty one
    /// (which cannot exist).
    pub async fn member_count(&self, session_id: &str) -> Option<usize> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.members.len())
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
impl SessionRegistry {
    /// Panics unless every session has identical member and handle key sets
    /// and no session is empty.
    pub(crate) async fn assert_consistent(&self) {
        let sessions = self.sessions.read().await;
        for (session_id, session) in sessions.iter() {
            assert!(!session.is_empty(), "empty session {session_id} left behind");
            assert_eq!(
                session.members.len(),
                session.handles.len(),
                "member/handle count mismatch in {session_id}"
            );
            for member in &session.members {
                assert!(
                    session.handles.contains_key(member),
                    "member {member} of {session_id} has no handle"
                );
            }
        }
    }
}
