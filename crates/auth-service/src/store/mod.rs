//! Redis-backed implementations of the session, rate-limit and replay
//! boundaries.
//!
//! # Key Patterns
//!
//! - `session:{id}` - Session record (HASH)
//! - `session:token:{digest}` - Access token digest to session id
//! - `session:refresh:{digest}` - Refresh token digest to session id
//! - `identity:{id}:sessions` - Session ids of one identity (SET)
//! - `ratelimit:login:{hash}` - Failure counter and lock (HASH)
//! - `replay:jti:{jti}` - Consumed single-use token marker
//!
//! # Connection Pattern
//!
//! `MultiplexedConnection` is cheap to clone and safe to use concurrently, so
//! each store holds one and clones it per operation.

mod lua_scripts;
mod rate_limit;
mod replay;
mod sessions;

pub use rate_limit::RedisRateLimiter;
pub use replay::RedisReplayGuard;
pub use sessions::RedisSessionStore;

use crate::errors::AuthError;
use common::secret::{ExposeSecret, SecretString};
use redis::aio::MultiplexedConnection;
use redis::Client;

/// Open a multiplexed connection.
///
/// # Errors
///
/// `AuthError::Store` if the URL is invalid or Redis is unreachable.
pub async fn connect(redis_url: &SecretString) -> Result<MultiplexedConnection, AuthError> {
    let client = Client::open(redis_url.expose_secret()).map_err(|e| {
        // The URL may embed credentials, so only the error is logged
        tracing::error!(target: "auth.store", error = %e, "Failed to open Redis client");
        AuthError::Store(format!("Failed to open Redis client: {e}"))
    })?;

    client.get_multiplexed_async_connection().await.map_err(|e| {
        tracing::error!(target: "auth.store", error = %e, "Failed to connect to Redis");
        AuthError::Store(format!("Failed to connect to Redis: {e}"))
    })
}

pub(crate) mod keys {
    use common::types::{IdentityId, SessionId};

    pub fn session(id: SessionId) -> String {
        format!("session:{id}")
    }

    pub fn access_index(digest: &str) -> String {
        format!("session:token:{digest}")
    }

    pub fn refresh_index(digest: &str) -> String {
        format!("session:refresh:{digest}")
    }

    pub fn identity_sessions(identity_id: IdentityId) -> String {
        format!("identity:{identity_id}:sessions")
    }

    pub fn login_failures(key: &str) -> String {
        format!("ratelimit:login:{key}")
    }

    pub fn consumed_jti(jti: &str) -> String {
        format!("replay:jti:{jti}")
    }
}
