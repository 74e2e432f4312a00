//! In-memory implementations of the auth service's storage boundaries.
//!
//! Each mirrors the semantics of its Redis or PostgreSQL counterpart closely
//! enough for orchestrator and HTTP tests: non-live sessions are invisible,
//! the failure counter locks on the threshold-th failure, and a consumed
//! `jti` stays consumed.

use async_trait::async_trait;
use auth_service::errors::AuthError;
use auth_service::rate_limit::{LockStatus, RateLimitPolicy, RateLimiter};
use auth_service::repositories::{Identity, IdentityRepository, Standing};
use auth_service::services::{OutOfBandToken, TokenDelivery};
use auth_service::sessions::{token_digest, NewSession, Session, SessionStatus, SessionStore};
use auth_service::tokens::{Purpose, ReplayGuard};
use chrono::{DateTime, Utc};
use common::types::{IdentityId, SessionId};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

// ============================================================================
// Sessions
// ============================================================================

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any stored session, live or not.
    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }

    /// Force a session past its expiry.
    pub fn expire(&self, id: SessionId) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(&id) {
            session.expires_at = Utc::now() - chrono::Duration::seconds(1);
        }
    }

    fn find_live(&self, pred: impl Fn(&Session) -> bool) -> Result<Session, AuthError> {
        let now = Utc::now();
        self.sessions
            .lock()
            .unwrap()
            .values()
            .find(|s| s.is_live(now) && pred(s))
            .cloned()
            .ok_or(AuthError::SessionNotFound)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: NewSession) -> Result<Session, AuthError> {
        let session = session.into_session(SessionId::new(), Utc::now());
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_by_token(&self, token: &str) -> Result<Session, AuthError> {
        let digest = token_digest(token);
        self.find_live(|s| s.session_token == digest)
    }

    async fn find_by_id(&self, id: SessionId) -> Result<Session, AuthError> {
        self.find_live(|s| s.id == id)
    }

    async fn find_by_refresh_token(&self, token: &str) -> Result<Session, AuthError> {
        let digest = token_digest(token);
        self.find_live(|s| s.refresh_token.as_deref() == Some(digest.as_str()))
    }

    async fn list_active(&self, identity_id: IdentityId) -> Result<Vec<Session>, AuthError> {
        let now = Utc::now();
        let mut sessions: Vec<Session> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.identity_id == identity_id && s.is_live(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.login_at.cmp(&a.login_at));
        Ok(sessions)
    }

    async fn touch(&self, id: SessionId) -> Result<(), AuthError> {
        let now = Utc::now();
        if let Some(session) = self.sessions.lock().unwrap().get_mut(&id) {
            if session.is_live(now) {
                session.last_activity_at = now;
            }
        }
        Ok(())
    }

    async fn rotate(
        &self,
        id: SessionId,
        expected_refresh: &str,
        new_access: &str,
        new_refresh: &str,
    ) -> Result<Session, AuthError> {
        let now = Utc::now();
        let expected = token_digest(expected_refresh);
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&id)
            .filter(|s| s.is_live(now) && s.refresh_token.as_deref() == Some(expected.as_str()))
            .ok_or(AuthError::SessionNotFound)?;

        session.session_token = token_digest(new_access);
        session.refresh_token = Some(token_digest(new_refresh));
        session.last_activity_at = now;
        Ok(session.clone())
    }

    async fn revoke(&self, id: SessionId) -> Result<(), AuthError> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&id)
            .filter(|s| s.is_live(now))
            .ok_or(AuthError::SessionNotFound)?;
        session.status = SessionStatus::Revoked;
        session.logout_at = Some(now);
        Ok(())
    }

    async fn revoke_all(&self, identity_id: IdentityId) -> Result<u64, AuthError> {
        let now = Utc::now();
        let mut revoked = 0;
        for session in self.sessions.lock().unwrap().values_mut() {
            if session.identity_id == identity_id && session.is_live(now) {
                session.status = SessionStatus::Revoked;
                session.logout_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

// ============================================================================
// Rate limiting
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct FailureEntry {
    count: u32,
    locked_until: Option<DateTime<Utc>>,
}

pub struct InMemoryRateLimiter {
    policy: RateLimitPolicy,
    entries: Mutex<HashMap<String, FailureEntry>>,
}

impl InMemoryRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Move a key's lock into the past, as if the window had elapsed.
    pub fn elapse_lock(&self, key: &str) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(key) {
            if entry.locked_until.is_some() {
                entry.locked_until = Some(Utc::now() - chrono::Duration::seconds(1));
            }
        }
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check_and_record_failure(&self, key: &str) -> Result<LockStatus, AuthError> {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key.to_string()).or_default();

        match entry.locked_until {
            Some(until) if until > now => {
                return Ok(LockStatus {
                    locked: true,
                    locked_until: Some(until),
                    failed_count: entry.count,
                });
            }
            Some(_) => *entry = FailureEntry::default(),
            None => {}
        }

        entry.count += 1;
        if entry.count >= self.policy.threshold {
            let window = chrono::Duration::from_std(self.policy.window).unwrap();
            let until = now + window;
            entry.locked_until = Some(until);
            return Ok(LockStatus {
                locked: true,
                locked_until: Some(until),
                failed_count: entry.count,
            });
        }
        Ok(LockStatus::unlocked(entry.count))
    }

    async fn status(&self, key: &str) -> Result<LockStatus, AuthError> {
        let now = Utc::now();
        let entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get(key) else {
            return Ok(LockStatus::unlocked(0));
        };
        let locked_until = entry.locked_until.filter(|until| *until > now);
        Ok(LockStatus {
            locked: locked_until.is_some(),
            locked_until,
            failed_count: entry.count,
        })
    }

    async fn reset(&self, key: &str) -> Result<(), AuthError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

// ============================================================================
// Replay guard
// ============================================================================

#[derive(Default)]
pub struct InMemoryReplayGuard {
    consumed: Mutex<HashSet<String>>,
}

impl InMemoryReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplayGuard for InMemoryReplayGuard {
    async fn consume(&self, jti: &str, _expires_at: DateTime<Utc>) -> Result<(), AuthError> {
        if self.consumed.lock().unwrap().insert(jti.to_string()) {
            Ok(())
        } else {
            Err(AuthError::TokenReplayed)
        }
    }
}

// ============================================================================
// Identities
// ============================================================================

#[derive(Clone)]
struct IdentityRecord {
    identity: Identity,
    roles: Vec<String>,
    permissions: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryIdentityRepository {
    records: Mutex<HashMap<IdentityId, IdentityRecord>>,
}

impl InMemoryIdentityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: Identity, roles: &[&str], permissions: &[&str]) {
        let record = IdentityRecord {
            roles: roles.iter().map(ToString::to_string).collect(),
            permissions: permissions.iter().map(ToString::to_string).collect(),
            identity,
        };
        self.records
            .lock()
            .unwrap()
            .insert(record.identity.id, record);
    }

    pub fn get(&self, id: IdentityId) -> Option<Identity> {
        self.records
            .lock()
            .unwrap()
            .get(&id)
            .map(|r| r.identity.clone())
    }

    /// Change an identity's grants without touching its sessions.
    pub fn set_roles(&self, id: IdentityId, roles: &[&str]) {
        if let Some(record) = self.records.lock().unwrap().get_mut(&id) {
            record.roles = roles.iter().map(ToString::to_string).collect();
        }
    }

    /// Change the email on file, as a profile update would.
    pub fn set_email(&self, id: IdentityId, email: &str) {
        if let Some(record) = self.records.lock().unwrap().get_mut(&id) {
            record.identity.email = Some(email.to_string());
            record.identity.email_verified = false;
        }
    }

    fn update<T>(&self, id: IdentityId, f: impl FnOnce(&mut Identity) -> T) -> Option<T> {
        self.records
            .lock()
            .unwrap()
            .get_mut(&id)
            .map(|r| f(&mut r.identity))
    }
}

#[async_trait]
impl IdentityRepository for InMemoryIdentityRepository {
    async fn find_by_login(&self, identifier: &str) -> Result<Option<Identity>, AuthError> {
        let identifier = identifier.trim();
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .map(|r| &r.identity)
            .find(|i| {
                i.email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(identifier))
                    || i.phone.as_deref() == Some(identifier)
            })
            .cloned())
    }

    async fn find_by_id(&self, id: IdentityId) -> Result<Option<Identity>, AuthError> {
        Ok(self.get(id))
    }

    async fn roles(&self, id: IdentityId) -> Result<Vec<String>, AuthError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&id)
            .map(|r| r.roles.clone())
            .unwrap_or_default())
    }

    async fn permissions(&self, id: IdentityId) -> Result<Vec<String>, AuthError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&id)
            .map(|r| r.permissions.clone())
            .unwrap_or_default())
    }

    async fn record_login(&self, id: IdentityId) -> Result<(), AuthError> {
        self.update(id, |i| i.last_login_at = Some(Utc::now()));
        Ok(())
    }

    async fn set_password_hash(&self, id: IdentityId, password_hash: &str) -> Result<(), AuthError> {
        self.update(id, |i| i.password_hash = password_hash.to_string());
        Ok(())
    }

    async fn mark_email_verified(&self, id: IdentityId, email: &str) -> Result<bool, AuthError> {
        Ok(self
            .update(id, |i| {
                if i.email.as_deref() == Some(email) {
                    i.email_verified = true;
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false))
    }

    async fn mark_phone_verified(&self, id: IdentityId, phone: &str) -> Result<bool, AuthError> {
        Ok(self
            .update(id, |i| {
                if i.phone.as_deref() == Some(phone) {
                    i.phone_verified = true;
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false))
    }

    async fn set_standing(&self, id: IdentityId, standing: Standing) -> Result<bool, AuthError> {
        Ok(self.update(id, |i| i.standing = standing).is_some())
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// Keeps every out-of-band token so tests can "open the email".
#[derive(Default)]
pub struct CapturingDelivery {
    sent: Mutex<Vec<OutOfBandToken>>,
}

impl CapturingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutOfBandToken> {
        self.sent.lock().unwrap().clone()
    }

    /// Most recent delivery for `purpose`.
    pub fn last(&self, purpose: Purpose) -> Option<OutOfBandToken> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.purpose == purpose)
            .cloned()
    }
}

#[async_trait]
impl TokenDelivery for CapturingDelivery {
    async fn deliver(&self, message: OutOfBandToken) -> Result<(), AuthError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}
