//! Identity repository boundary.
//!
//! Identities are owned by the wider platform; this layer reads id, login
//! identifiers, roles and permissions, and writes login bookkeeping,
//! password changes, verification flags and standing.

mod identities;

pub use identities::PgIdentityRepository;

use crate::errors::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::IdentityId;
use sqlx::PgPool;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Administrative standing of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Standing {
    Active,
    Suspended,
    Deactivated,
}

impl Standing {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Standing::Active => "active",
            Standing::Suspended => "suspended",
            Standing::Deactivated => "deactivated",
        }
    }

    /// Whether sessions may exist for an identity in this standing.
    #[must_use]
    pub const fn permits_sessions(self) -> bool {
        matches!(self, Standing::Active)
    }
}

impl FromStr for Standing {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Standing::Active),
            "suspended" => Ok(Standing::Suspended),
            "deactivated" => Ok(Standing::Deactivated),
            other => Err(AuthError::Database(format!("Unknown standing: {other}"))),
        }
    }
}

impl fmt::Display for Standing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: IdentityId,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: String,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub standing: Standing,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("phone", &self.phone.as_ref().map(|_| "[REDACTED]"))
            .field("password_hash", &"[REDACTED]")
            .field("email_verified", &self.email_verified)
            .field("phone_verified", &self.phone_verified)
            .field("standing", &self.standing)
            .field("last_login_at", &self.last_login_at)
            .finish()
    }
}

#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// Look up by email (case-insensitive) or phone.
    async fn find_by_login(&self, identifier: &str) -> Result<Option<Identity>, AuthError>;

    async fn find_by_id(&self, id: IdentityId) -> Result<Option<Identity>, AuthError>;

    async fn roles(&self, id: IdentityId) -> Result<Vec<String>, AuthError>;

    /// Union of the permissions granted by the identity's roles.
    async fn permissions(&self, id: IdentityId) -> Result<Vec<String>, AuthError>;

    async fn record_login(&self, id: IdentityId) -> Result<(), AuthError>;

    async fn set_password_hash(&self, id: IdentityId, password_hash: &str) -> Result<(), AuthError>;

    /// Mark `email` verified, only if it is still the identity's email.
    async fn mark_email_verified(&self, id: IdentityId, email: &str) -> Result<bool, AuthError>;

    /// Mark `phone` verified, only if it is still the identity's phone.
    async fn mark_phone_verified(&self, id: IdentityId, phone: &str) -> Result<bool, AuthError>;

    /// Returns false if the identity does not exist.
    async fn set_standing(&self, id: IdentityId, standing: Standing) -> Result<bool, AuthError>;
}

/// Apply the schema migrations shipped with this crate.
///
/// # Errors
///
/// `AuthError::Database` if a migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AuthError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AuthError::Database(format!("Migration failed: {e}")))
}
