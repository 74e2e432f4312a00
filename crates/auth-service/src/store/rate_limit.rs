use super::{keys, lua_scripts};
use crate::errors::AuthError;
use crate::rate_limit::{LockStatus, RateLimitPolicy, RateLimiter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{instrument, warn};

/// Login failure counter over a Redis hash, shared by every server process.
#[derive(Clone)]
pub struct RedisRateLimiter {
    connection: MultiplexedConnection,
    policy: RateLimitPolicy,
    record_script: Script,
}

impl RedisRateLimiter {
    #[must_use]
    pub fn new(connection: MultiplexedConnection, policy: RateLimitPolicy) -> Self {
        Self {
            connection,
            policy,
            record_script: Script::new(lua_scripts::RECORD_FAILURE),
        }
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.policy.window.as_millis()).unwrap_or(i64::MAX)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    #[instrument(skip_all)]
    async fn check_and_record_failure(&self, key: &str) -> Result<LockStatus, AuthError> {
        let mut conn = self.connection.clone();
        let (locked, until_ms, count): (i64, i64, i64) = self
            .record_script
            .key(keys::login_failures(key))
            .arg(Utc::now().timestamp_millis())
            .arg(self.policy.threshold)
            .arg(self.window_ms())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(target: "auth.rate_limit", error = %e, "Failed to record login failure");
                AuthError::from(e)
            })?;

        Ok(LockStatus {
            locked: locked == 1,
            locked_until: (locked == 1)
                .then(|| DateTime::from_timestamp_millis(until_ms))
                .flatten(),
            failed_count: u32::try_from(count).unwrap_or(u32::MAX),
        })
    }

    #[instrument(skip_all)]
    async fn status(&self, key: &str) -> Result<LockStatus, AuthError> {
        let mut conn = self.connection.clone();
        let (count, until_ms): (Option<u32>, Option<i64>) = conn
            .hget(keys::login_failures(key), &["failed_count", "locked_until"][..])
            .await?;

        let now = Utc::now();
        let locked_until = until_ms
            .and_then(DateTime::from_timestamp_millis)
            .filter(|until| *until > now);

        Ok(LockStatus {
            locked: locked_until.is_some(),
            locked_until,
            failed_count: count.unwrap_or(0),
        })
    }

    #[instrument(skip_all)]
    async fn reset(&self, key: &str) -> Result<(), AuthError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.del(keys::login_failures(key)).await?;
        Ok(())
    }
}
