//! Session Store: server-issued identities carried in a cookie.
//!
//! The `SessionStore` trait covers get/set/expire so the in-memory map can be
//! swapped for a persistent or shared backend without touching the handlers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session backend error: {0}")]
    Backend(String),

    #[error("Session lifetime of {0}s is out of range")]
    TtlOutOfRange(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Issue a fresh session with a random UUIDv4 identifier.
    pub fn issue(ttl: Duration) -> Result<Self, SessionError> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(SessionError::TtlOutOfRange(ttl.num_seconds()))?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            expires_at,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Look up a live session. Expired entries read as `None`.
    async fn get(&self, id: &str) -> Result<Option<Session>, SessionError>;

    async fn set(&self, session: Session) -> Result<(), SessionError>;

    /// Drop a session. Returns `true` if it existed.
    async fn expire(&self, id: &str) -> Result<bool, SessionError>;

    /// Evict every expired session, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, SessionError>;
}

/// Resolve the session named by a cookie value, issuing a new one when the
/// cookie is absent, unknown or expired. The flag is `true` for new sessions.
pub async fn resolve_or_issue(
    store: &dyn SessionStore,
    cookie_value: Option<&str>,
    ttl: Duration,
) -> Result<(Session, bool), SessionError> {
    if let Some(id) = cookie_value.filter(|v| !v.is_empty()) {
        if let Some(session) = store.get(id).await? {
            return Ok((session, false));
        }
        tracing::debug!(session_id = id, "Unknown or expired session cookie, issuing a new one");
    }

    let session = Session::issue(ttl)?;
    store.set(session.clone()).await?;
    Ok((session, true))
}

// ============================================================================
// MemorySessionStore
// ============================================================================

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>, SessionError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(id)
            .filter(|s| !s.is_expired_at(Utc::now()))
            .cloned())
    }

    async fn set(&self, session: Session) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
        Ok(())
    }

    async fn expire(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }

    async fn purge_expired(&self) -> Result<usize, SessionError> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now));
        Ok(before - sessions.len())
    }
}
