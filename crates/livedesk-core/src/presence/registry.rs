//! Presence registry mapping connections to role and session membership.
//!
//! Owned and mutated only by the session coordinator. Each coordinator holds
//! its own registry, so tests can run independent instances side by side.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use livedesk_types::identity::{ConnectionId, ConnectionRole, UserRef};
use tracing::debug;
use uuid::Uuid;

/// What the coordinator knows about one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub role: ConnectionRole,
    pub identity: UserRef,
    /// Session the connection is currently part of.
    pub session_id: Option<Uuid>,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: HashMap<ConnectionId, PresenceEntry>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. Re-registering replaces the old entry.
    pub fn register(&mut self, connection_id: ConnectionId, role: ConnectionRole, identity: UserRef) {
        debug!(%connection_id, %role, "presence registered");
        self.entries.insert(
            connection_id,
            PresenceEntry {
                role,
                identity,
                session_id: None,
                connected_at: Utc::now(),
            },
        );
    }

    /// Attach a connection to a session. Returns `false` if the connection is unknown.
    pub fn bind_session(&mut self, connection_id: ConnectionId, session_id: Uuid) -> bool {
        match self.entries.get_mut(&connection_id) {
            Some(entry) => {
                entry.session_id = Some(session_id);
                true
            }
            None => false,
        }
    }

    /// Detach a connection from `session_id`, leaving other bindings alone.
    pub fn clear_session(&mut self, connection_id: ConnectionId, session_id: Uuid) {
        if let Some(entry) = self.entries.get_mut(&connection_id) {
            if entry.session_id == Some(session_id) {
                entry.session_id = None;
            }
        }
    }

    /// Drop a connection, returning what was known about it.
    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<PresenceEntry> {
        let removed = self.entries.remove(&connection_id);
        if removed.is_some() {
            debug!(%connection_id, "presence removed");
        }
        removed
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<&PresenceEntry> {
        self.entries.get(&connection_id)
    }

    pub fn role_of(&self, connection_id: ConnectionId) -> Option<ConnectionRole> {
        self.entries.get(&connection_id).map(|e| e.role)
    }

    /// Number of live connections with the given role.
    pub fn count(&self, role: ConnectionRole) -> usize {
        self.entries.values().filter(|e| e.role == role).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
