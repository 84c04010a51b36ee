use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use zlremote_protocol::{ConnectionId, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unassigned,
    Host,
    Viewer,
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub role: Role,
    pub session: Option<SessionId>,
    /// Last inbound frame of any kind
    pub last_seen: Instant,
    pub connected_at: DateTime<Utc>,
}

impl Connection {
    /// Session this connection hosts, if any
    pub fn hosted_session(&self) -> Option<&SessionId> {
        match self.role {
            Role::Host => self.session.as_ref(),
            _ => None,
        }
    }

    /// Session this connection views, if any
    pub fn viewed_session(&self) -> Option<&SessionId> {
        match self.role {
            Role::Viewer => self.session.as_ref(),
            _ => None,
        }
    }
}

/// Every live signaling connection, keyed by id
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id was already registered
    pub fn insert(&mut self, id: ConnectionId, now: Instant) -> bool {
        if self.connections.contains_key(&id) {
            return false;
        }
        self.connections.insert(
            id,
            Connection {
                id,
                role: Role::Unassigned,
                session: None,
                last_seen: now,
                connected_at: Utc::now(),
            },
        );
        true
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn assign(&mut self, id: &ConnectionId, role: Role, session: SessionId) {
        if let Some(conn) = self.connections.get_mut(id) {
            conn.role = role;
            conn.session = Some(session);
        }
    }

    pub fn clear_role(&mut self, id: &ConnectionId) {
        if let Some(conn) = self.connections.get_mut(id) {
            conn.role = Role::Unassigned;
            conn.session = None;
        }
    }

    pub fn touch(&mut self, id: &ConnectionId, now: Instant) -> bool {
        match self.connections.get_mut(id) {
            Some(conn) => {
                conn.last_seen = now;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &ConnectionId) -> Option<Connection> {
        self.connections.remove(id)
    }

    /// Connections silent for longer than `timeout`
    pub fn stale(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|conn| now.saturating_duration_since(conn.last_seen) > timeout)
            .map(|conn| conn.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
