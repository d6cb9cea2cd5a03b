use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    dashmap::DashMap,
    serde::{Deserialize, Serialize},
};

/// Opaque token naming who a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Server-side record of a login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub identity: Identity,
    /// Unix seconds.
    pub issued_at: u64,
    /// Unix seconds; `None` when the cookie max-age is 0.
    pub expires_at: Option<u64>,
}

impl Session {
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Backend holding live sessions.
///
/// Reads must not mutate: validation runs concurrently on every request.
pub trait SessionStore: Send + Sync {
    fn insert(&self, session: Session);

    fn get(&self, session_id: &str) -> Option<Session>;

    /// Drop every session of `identity`. Returns how many were removed.
    fn remove_identity(&self, identity: &Identity) -> usize;

    /// Drop sessions expired at `now`. Returns how many were removed.
    fn purge_expired(&self, now: u64) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process store. Sessions do not survive a restart.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn insert(&self, session: Session) {
        self.sessions.insert(session.id.clone(), session);
    }

    fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    fn remove_identity(&self, identity: &Identity) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| &s.identity != identity);
        before.saturating_sub(self.sessions.len())
    }

    fn purge_expired(&self, now: u64) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired_at(now));
        before.saturating_sub(self.sessions.len())
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}
