//! Concurrent storage of the sessions a container manages.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::SessionId;
use crate::session::{Session, SessionInfo};

/// Live sessions keyed by id.
///
/// Holds strong handles; a session is dropped from here by its removal
/// hook once it reaches `Closed`. Locks are never held across an await.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `session`. Returns `false` if its id was already present.
    pub fn insert(&self, session: Session) -> bool {
        let mut map = self.sessions.write();
        if map.contains_key(&session.id()) {
            return false;
        }
        map.insert(session.id(), session);
        true
    }

    /// Looks a session up by id.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.sessions.read().get(&id).cloned()
    }

    /// Forgets a session, returning it if it was present.
    pub fn remove(&self, id: SessionId) -> Option<Session> {
        self.sessions.write().remove(&id)
    }

    /// Handles to every registered session.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Session> {
        self.sessions.read().values().cloned().collect()
    }

    /// Summaries of every registered session, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> =
            self.sessions.read().values().map(SessionInfo::from).collect();
        infos.sort_by_key(|info| info.opened_at);
        infos
    }

    /// Drops every handle.
    pub fn clear(&self) {
        self.sessions.write().clear();
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// `true` if no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
