//! Failed-login tracking and temporary lockout.

use crate::errors::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Lock state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatus {
    pub locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub failed_count: u32,
}

impl LockStatus {
    #[must_use]
    pub fn unlocked(failed_count: u32) -> Self {
        Self {
            locked: false,
            locked_until: None,
            failed_count,
        }
    }
}

/// Threshold and window, shared by every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub threshold: u32,
    pub window: Duration,
}

/// Shared failure counter with lockout.
///
/// Implementations must make `check_and_record_failure` a single atomic step
/// against storage shared by every server process.
///
/// Semantics:
/// - While locked, further failures are not counted and the lock is not extended
/// - The failure that reaches the threshold locks for one window
/// - `reset` clears both the counter and the lock
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record a failed attempt for `key` and return the resulting state.
    async fn check_and_record_failure(&self, key: &str) -> Result<LockStatus, AuthError>;

    /// Read the current state without recording anything.
    async fn status(&self, key: &str) -> Result<LockStatus, AuthError>;

    async fn reset(&self, key: &str) -> Result<(), AuthError>;
}

/// Normalize a login identifier into a rate-limit key.
///
/// Case and surrounding whitespace are ignored so `Agent@Example.com ` and
/// `agent@example.com` share one counter. The identifier itself is hashed so
/// raw emails and phone numbers never appear in the shared store.
#[must_use]
pub fn login_key(identifier: &str) -> String {
    let normalized = identifier.trim().to_lowercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}
