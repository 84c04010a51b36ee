use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use zlremote_protocol::{ConnectionId, SessionId};

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub host: ConnectionId,
    pub viewers: HashSet<ConnectionId>,
    password: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Opaque description the host sent with `register_host`
    pub device_info: Option<Value>,
}

impl Session {
    pub fn new(
        id: SessionId,
        host: ConnectionId,
        password: Option<String>,
        device_info: Option<Value>,
    ) -> Self {
        Self {
            id,
            host,
            viewers: HashSet::new(),
            password,
            created_at: Utc::now(),
            device_info,
        }
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Byte-exact comparison; a session without a password accepts anything
    pub fn accepts(&self, password: Option<&str>) -> bool {
        match &self.password {
            Some(expected) => password == Some(expected.as_str()),
            None => true,
        }
    }
}

/// Active sessions, keyed by their normalized code
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<Session> {
        self.sessions.remove(id)
    }

    /// Returns true if the viewer was not already present
    pub fn add_viewer(&mut self, id: &SessionId, viewer: ConnectionId) -> bool {
        self.sessions
            .get_mut(id)
            .is_some_and(|session| session.viewers.insert(viewer))
    }

    pub fn remove_viewer(&mut self, id: &SessionId, viewer: &ConnectionId) -> bool {
        self.sessions
            .get_mut(id)
            .is_some_and(|session| session.viewers.remove(viewer))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
