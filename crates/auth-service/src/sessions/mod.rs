//! Session records and the session store boundary.
//!
//! A session is the server-side half of a login: tokens are only honoured
//! while the session they were minted against is live. Stores never hand out
//! non-live sessions; revoked, expired and unknown sessions all surface as
//! `AuthError::SessionNotFound`.

use crate::errors::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::types::{IdentityId, SessionId};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Revoked,
    Expired,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Revoked => "revoked",
            SessionStatus::Expired => "expired",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "revoked" => Ok(SessionStatus::Revoked),
            "expired" => Ok(SessionStatus::Expired),
            other => Err(AuthError::Store(format!("Unknown session status: {other}"))),
        }
    }
}

/// A stored session. Token fields hold SHA-256 digests, never raw tokens.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub identity_id: IdentityId,
    #[serde(skip)]
    pub session_token: String,
    #[serde(skip)]
    pub refresh_token: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub status: SessionStatus,
    pub login_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub logout_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Active and not past `expires_at`.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && now < self.expires_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("identity_id", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("device_id", &self.device_id)
            .field("status", &self.status)
            .field("login_at", &self.login_at)
            .field("last_activity_at", &self.last_activity_at)
            .field("expires_at", &self.expires_at)
            .field("logout_at", &self.logout_at)
            .finish()
    }
}

/// Input for [`SessionStore::create`]. Tokens are raw here and digested by
/// the store.
#[derive(Clone)]
pub struct NewSession {
    pub identity_id: IdentityId,
    pub session_token: String,
    pub refresh_token: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub ttl: Duration,
}

impl fmt::Debug for NewSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewSession")
            .field("identity_id", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .field("device_id", &self.device_id)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl NewSession {
    /// Materialize the record a store persists.
    #[must_use]
    pub fn into_session(self, id: SessionId, now: DateTime<Utc>) -> Session {
        Session {
            id,
            identity_id: self.identity_id,
            session_token: token_digest(&self.session_token),
            refresh_token: self.refresh_token.as_deref().map(token_digest),
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            device_id: self.device_id,
            status: SessionStatus::Active,
            login_at: now,
            last_activity_at: now,
            expires_at: now + self.ttl,
            logout_at: None,
        }
    }
}

/// Hex SHA-256 of a raw token, the form tokens are stored and indexed under.
#[must_use]
pub fn token_digest(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Durable, TTL-backed session registry.
///
/// Implementations must be safe across processes: every mutation is a single
/// atomic operation against the backing store. `revoke_all` and `create` for
/// the same identity serialize, so a session created concurrently with a
/// revoke-all is either revoked by it or created after it.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: NewSession) -> Result<Session, AuthError>;

    /// Live session bound to this raw access token.
    async fn find_by_token(&self, token: &str) -> Result<Session, AuthError>;

    async fn find_by_id(&self, id: SessionId) -> Result<Session, AuthError>;

    /// Live session bound to this raw refresh token.
    async fn find_by_refresh_token(&self, token: &str) -> Result<Session, AuthError>;

    /// Live sessions for an identity, newest login first.
    async fn list_active(&self, identity_id: IdentityId) -> Result<Vec<Session>, AuthError>;

    /// Bump `last_activity_at`. A no-op for non-live sessions.
    async fn touch(&self, id: SessionId) -> Result<(), AuthError>;

    /// Swap the session's tokens, only if `expected_refresh` is still current.
    ///
    /// Fails with `SessionNotFound` if the session is not live or the refresh
    /// token was already rotated away.
    async fn rotate(
        &self,
        id: SessionId,
        expected_refresh: &str,
        new_access: &str,
        new_refresh: &str,
    ) -> Result<Session, AuthError>;

    /// Revoke one session. Revoking a non-live session is `SessionNotFound`.
    async fn revoke(&self, id: SessionId) -> Result<(), AuthError>;

    /// Revoke every live session of an identity; returns how many.
    async fn revoke_all(&self, identity_id: IdentityId) -> Result<u64, AuthError>;
}
