use super::keys;
use crate::errors::AuthError;
use crate::tokens::ReplayGuard;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tracing::{debug, instrument};

/// Floor on marker lifetime when no leeway is configured.
const MIN_MARKER_TTL_MS: i64 = 1_000;

/// Marker lifetime for a token expiring at `expires_at`.
///
/// The verifier accepts a token until `exp + leeway`, so the marker has to
/// outlive that point or a replay inside the leeway window would pass.
pub(crate) fn marker_ttl_ms(expires_at: DateTime<Utc>, now: DateTime<Utc>, leeway: Duration) -> i64 {
    let leeway_ms = i64::try_from(leeway.as_millis()).unwrap_or(i64::MAX);
    (expires_at - now)
        .num_milliseconds()
        .max(0)
        .saturating_add(leeway_ms)
        .max(MIN_MARKER_TTL_MS)
}

/// Single-use token markers stored with `SET NX PX`.
#[derive(Clone)]
pub struct RedisReplayGuard {
    connection: MultiplexedConnection,
    leeway: Duration,
}

impl RedisReplayGuard {
    /// `leeway` must match the verifier's clock-skew leeway.
    #[must_use]
    pub fn new(connection: MultiplexedConnection, leeway: Duration) -> Self {
        Self { connection, leeway }
    }
}

#[async_trait]
impl ReplayGuard for RedisReplayGuard {
    #[instrument(skip_all)]
    async fn consume(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), AuthError> {
        let ttl_ms = marker_ttl_ms(expires_at, Utc::now(), self.leeway);

        let mut conn = self.connection.clone();
        let stored: Option<String> = redis::cmd("SET")
            .arg(keys::consumed_jti(jti))
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        if stored.is_some() {
            Ok(())
        } else {
            debug!(target: "auth.crypto", "Single-use token presented again");
            Err(AuthError::TokenReplayed)
        }
    }
}
