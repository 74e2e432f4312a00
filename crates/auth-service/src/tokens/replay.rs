use crate::errors::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Records consumed `jti` values of single-use tokens.
///
/// A marker only needs to live until the token's own expiry; after that the
/// verifier rejects the token on `exp` anyway.
#[async_trait]
pub trait ReplayGuard: Send + Sync {
    /// Atomically mark `jti` as used.
    ///
    /// # Errors
    ///
    /// `TokenReplayed` if the `jti` was already consumed; store errors as
    /// `AuthError::Store`.
    async fn consume(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), AuthError>;
}
