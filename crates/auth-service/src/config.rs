//! Auth service configuration.
//!
//! Configuration is loaded from environment variables. Connection URLs are
//! held as `SecretString` because they routinely embed passwords
//! (`redis://:password@host`), and `Config`'s Debug output redacts them.

use crate::tokens::TokenLifetimes;
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default key id stamped into the header of every issued token.
pub const DEFAULT_ACTIVE_KEY_ID: &str = "bundlehub-primary";

/// Default `iss` claim.
pub const DEFAULT_ISSUER: &str = "bundlehub-auth";

/// Default `aud` claim.
pub const DEFAULT_AUDIENCE: &str = "bundlehub-api";

/// Default access token lifetime (24 hours).
pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;

/// Default refresh token lifetime (60 days). Sessions share this lifetime.
pub const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 60 * 24 * 60 * 60;

/// Default lifetime for password reset and verification tokens (30 minutes).
pub const DEFAULT_TEMP_TOKEN_TTL_SECONDS: i64 = 30 * 60;

/// Default magic link lifetime (15 minutes).
pub const DEFAULT_MAGIC_LINK_TTL_SECONDS: i64 = 15 * 60;

/// Default number of failed logins before a key is locked.
pub const DEFAULT_LOCK_THRESHOLD: u32 = 5;

/// Default lock window (15 minutes). Also the TTL of the failure counter.
pub const DEFAULT_LOCK_WINDOW_SECONDS: u64 = 15 * 60;

/// Default bcrypt cost factor.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Minimum bcrypt cost accepted from configuration.
pub const MIN_BCRYPT_COST: u32 = 10;

/// Maximum bcrypt cost accepted from configuration.
pub const MAX_BCRYPT_COST: u32 = 14;

/// Default hub mailbox capacity.
pub const DEFAULT_HUB_MAILBOX_CAPACITY: usize = 1024;

/// Default per-connection outbound buffer.
pub const DEFAULT_CONNECTION_BUFFER: usize = 64;

/// Default WebSocket ping interval.
pub const DEFAULT_WS_PING_INTERVAL_SECONDS: u64 = 30;

/// Auth service configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP bind address.
    pub bind_address: String,

    /// Redis URL for sessions, rate-limit counters and one-time token ledger.
    pub redis_url: SecretString,

    /// PostgreSQL URL of the identity store.
    pub database_url: SecretString,

    /// Apply the bundled identity schema migrations at startup.
    pub run_migrations: bool,

    /// PKCS#8 PEM file holding the Ed25519 signing key.
    pub signing_key_path: PathBuf,

    /// PEM file holding the matching Ed25519 public key.
    pub public_key_path: PathBuf,

    /// Key id of the active signing key.
    pub active_key_id: String,

    /// Retired public keys still accepted for verification, as (kid, path).
    pub retired_public_keys: Vec<(String, PathBuf)>,

    /// Expected `iss` claim.
    pub issuer: String,

    /// Expected `aud` value.
    pub audience: String,

    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub temp_token_ttl_seconds: i64,
    pub magic_link_ttl_seconds: i64,

    /// Leeway applied to `exp`/`nbf` checks.
    pub jwt_clock_skew_seconds: u64,

    /// Failed attempts before lockout.
    pub lock_threshold: u32,

    /// Lockout duration and failure counter TTL.
    pub lock_window_seconds: u64,

    /// Bcrypt cost for password hashing.
    pub bcrypt_cost: u32,

    /// Update `last_activity_at` on every authenticated request.
    pub track_session_activity: bool,

    pub hub_mailbox_capacity: usize,
    pub connection_buffer: usize,
    pub ws_ping_interval_seconds: u64,
}

/// Custom Debug implementation that redacts connection URLs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("redis_url", &"[REDACTED]")
            .field("database_url", &"[REDACTED]")
            .field("run_migrations", &self.run_migrations)
            .field("signing_key_path", &self.signing_key_path)
            .field("public_key_path", &self.public_key_path)
            .field("active_key_id", &self.active_key_id)
            .field("retired_public_keys", &self.retired_public_keys)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_ttl_seconds", &self.access_token_ttl_seconds)
            .field("refresh_token_ttl_seconds", &self.refresh_token_ttl_seconds)
            .field("temp_token_ttl_seconds", &self.temp_token_ttl_seconds)
            .field("magic_link_ttl_seconds", &self.magic_link_ttl_seconds)
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("lock_threshold", &self.lock_threshold)
            .field("lock_window_seconds", &self.lock_window_seconds)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("track_session_activity", &self.track_session_activity)
            .field("hub_mailbox_capacity", &self.hub_mailbox_capacity)
            .field("connection_buffer", &self.connection_buffer)
            .field("ws_ping_interval_seconds", &self.ws_ping_interval_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid bcrypt cost configuration: {0}")]
    InvalidBcryptCost(String),

    #[error("Invalid rate limit configuration: {0}")]
    InvalidRateLimit(String),

    #[error("Invalid token lifetime configuration: {0}")]
    InvalidTokenLifetime(String),

    #[error("Invalid retired key list: {0}")]
    InvalidRetiredKeys(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = SecretString::from(required(vars, "REDIS_URL")?);
        let database_url = SecretString::from(required(vars, "DATABASE_URL")?);
        let signing_key_path = PathBuf::from(required(vars, "AUTH_SIGNING_KEY_PATH")?);
        let public_key_path = PathBuf::from(required(vars, "AUTH_PUBLIC_KEY_PATH")?);

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let active_key_id = vars
            .get("AUTH_ACTIVE_KEY_ID")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ACTIVE_KEY_ID.to_string());

        let retired_public_keys = match vars.get("AUTH_RETIRED_PUBLIC_KEYS") {
            Some(value) => parse_retired_keys(value, &active_key_id)?,
            None => Vec::new(),
        };

        let issuer = vars
            .get("AUTH_ISSUER")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ISSUER.to_string());

        let audience = vars
            .get("AUTH_AUDIENCE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_AUDIENCE.to_string());

        let run_migrations = parse_or(vars, "AUTH_RUN_MIGRATIONS", false)?;

        // Token lifetimes: all positive, temporary classes never outlive access
        let access_token_ttl_seconds =
            parse_or(vars, "ACCESS_TOKEN_TTL_SECONDS", DEFAULT_ACCESS_TOKEN_TTL_SECONDS)?;
        let refresh_token_ttl_seconds =
            parse_or(vars, "REFRESH_TOKEN_TTL_SECONDS", DEFAULT_REFRESH_TOKEN_TTL_SECONDS)?;
        let temp_token_ttl_seconds =
            parse_or(vars, "TEMP_TOKEN_TTL_SECONDS", DEFAULT_TEMP_TOKEN_TTL_SECONDS)?;
        let magic_link_ttl_seconds =
            parse_or(vars, "MAGIC_LINK_TTL_SECONDS", DEFAULT_MAGIC_LINK_TTL_SECONDS)?;

        for (name, value) in [
            ("ACCESS_TOKEN_TTL_SECONDS", access_token_ttl_seconds),
            ("REFRESH_TOKEN_TTL_SECONDS", refresh_token_ttl_seconds),
            ("TEMP_TOKEN_TTL_SECONDS", temp_token_ttl_seconds),
            ("MAGIC_LINK_TTL_SECONDS", magic_link_ttl_seconds),
        ] {
            if value <= 0 {
                return Err(ConfigError::InvalidTokenLifetime(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }

        if temp_token_ttl_seconds > access_token_ttl_seconds
            || magic_link_ttl_seconds > access_token_ttl_seconds
        {
            return Err(ConfigError::InvalidTokenLifetime(
                "temporary token lifetimes must not exceed the access token lifetime".to_string(),
            ));
        }

        if refresh_token_ttl_seconds < access_token_ttl_seconds {
            return Err(ConfigError::InvalidTokenLifetime(format!(
                "REFRESH_TOKEN_TTL_SECONDS ({refresh_token_ttl_seconds}) must be at least ACCESS_TOKEN_TTL_SECONDS ({access_token_ttl_seconds})"
            )));
        }

        let jwt_clock_skew_seconds =
            parse_or(vars, "JWT_CLOCK_SKEW_SECONDS", DEFAULT_CLOCK_SKEW.as_secs())?;
        if jwt_clock_skew_seconds > MAX_CLOCK_SKEW.as_secs() {
            return Err(ConfigError::InvalidJwtClockSkew(format!(
                "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                MAX_CLOCK_SKEW.as_secs(),
                jwt_clock_skew_seconds
            )));
        }

        let bcrypt_cost = parse_or(vars, "BCRYPT_COST", DEFAULT_BCRYPT_COST)?;
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&bcrypt_cost) {
            return Err(ConfigError::InvalidBcryptCost(format!(
                "BCRYPT_COST must be between {MIN_BCRYPT_COST} and {MAX_BCRYPT_COST}, got {bcrypt_cost}"
            )));
        }

        let lock_threshold = parse_or(vars, "LOGIN_LOCK_THRESHOLD", DEFAULT_LOCK_THRESHOLD)?;
        if lock_threshold == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "LOGIN_LOCK_THRESHOLD must be greater than 0".to_string(),
            ));
        }

        let lock_window_seconds =
            parse_or(vars, "LOGIN_LOCK_WINDOW_SECONDS", DEFAULT_LOCK_WINDOW_SECONDS)?;
        if lock_window_seconds == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "LOGIN_LOCK_WINDOW_SECONDS must be greater than 0".to_string(),
            ));
        }

        let track_session_activity = parse_or(vars, "TRACK_SESSION_ACTIVITY", true)?;

        let hub_mailbox_capacity =
            parse_positive(vars, "HUB_MAILBOX_CAPACITY", DEFAULT_HUB_MAILBOX_CAPACITY)?;
        let connection_buffer =
            parse_positive(vars, "WS_CONNECTION_BUFFER", DEFAULT_CONNECTION_BUFFER)?;
        let ws_ping_interval_seconds =
            parse_positive(vars, "WS_PING_INTERVAL_SECONDS", DEFAULT_WS_PING_INTERVAL_SECONDS)?;

        Ok(Config {
            bind_address,
            redis_url,
            database_url,
            run_migrations,
            signing_key_path,
            public_key_path,
            active_key_id,
            retired_public_keys,
            issuer,
            audience,
            access_token_ttl_seconds,
            refresh_token_ttl_seconds,
            temp_token_ttl_seconds,
            magic_link_ttl_seconds,
            jwt_clock_skew_seconds,
            lock_threshold,
            lock_window_seconds,
            bcrypt_cost,
            track_session_activity,
            hub_mailbox_capacity,
            connection_buffer,
            ws_ping_interval_seconds,
        })
    }

    /// Token lifetimes per purpose class.
    #[must_use]
    pub fn token_lifetimes(&self) -> TokenLifetimes {
        TokenLifetimes {
            access: chrono::Duration::seconds(self.access_token_ttl_seconds),
            refresh: chrono::Duration::seconds(self.refresh_token_ttl_seconds),
            temporary: chrono::Duration::seconds(self.temp_token_ttl_seconds),
            magic_link: chrono::Duration::seconds(self.magic_link_ttl_seconds),
        }
    }

    #[must_use]
    pub fn lock_window(&self) -> Duration {
        Duration::from_secs(self.lock_window_seconds)
    }

    #[must_use]
    pub fn ws_ping_interval(&self) -> Duration {
        Duration::from_secs(self.ws_ping_interval_seconds)
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn parse_or<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(name) {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            reason: format!("could not parse '{raw}': {e}"),
        }),
        None => Ok(default),
    }
}

fn parse_positive<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
    T::Err: fmt::Display,
{
    let value = parse_or(vars, name, default)?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(value)
}

/// Parse `kid=path,kid=path` into retired verification keys.
fn parse_retired_keys(
    value: &str,
    active_key_id: &str,
) -> Result<Vec<(String, PathBuf)>, ConfigError> {
    let mut keys: Vec<(String, PathBuf)> = Vec::new();

    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (kid, path) = entry.split_once('=').ok_or_else(|| {
            ConfigError::InvalidRetiredKeys(format!("expected kid=path, got '{entry}'"))
        })?;
        let (kid, path) = (kid.trim(), path.trim());

        if kid.is_empty() || path.is_empty() {
            return Err(ConfigError::InvalidRetiredKeys(format!(
                "expected kid=path, got '{entry}'"
            )));
        }
        if kid == active_key_id {
            return Err(ConfigError::InvalidRetiredKeys(format!(
                "retired key id '{kid}' collides with the active key id"
            )));
        }
        if keys.iter().any(|(existing, _)| existing == kid) {
            return Err(ConfigError::InvalidRetiredKeys(format!(
                "duplicate key id '{kid}'"
            )));
        }

        keys.push((kid.to_string(), PathBuf::from(path)));
    }

    Ok(keys)
}
