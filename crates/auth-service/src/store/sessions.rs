use super::{keys, lua_scripts};
use crate::errors::AuthError;
use crate::sessions::{token_digest, NewSession, Session, SessionStatus, SessionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{IdentityId, SessionId};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

/// Session store over Redis hashes with token-digest indexes.
#[derive(Clone)]
pub struct RedisSessionStore {
    connection: MultiplexedConnection,
    create_script: Script,
    touch_script: Script,
    rotate_script: Script,
    revoke_script: Script,
    revoke_all_script: Script,
}

impl RedisSessionStore {
    #[must_use]
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self {
            connection,
            create_script: Script::new(lua_scripts::CREATE_SESSION),
            touch_script: Script::new(lua_scripts::TOUCH_SESSION),
            rotate_script: Script::new(lua_scripts::ROTATE_SESSION),
            revoke_script: Script::new(lua_scripts::REVOKE_SESSION),
            revoke_all_script: Script::new(lua_scripts::REVOKE_ALL_SESSIONS),
        }
    }

    async fn load(&self, id: SessionId) -> Result<Option<Session>, AuthError> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> = conn.hgetall(keys::session(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        session_from_fields(id, &fields).map(Some)
    }

    async fn load_live(&self, id: SessionId) -> Result<Session, AuthError> {
        match self.load(id).await? {
            Some(session) if session.is_live(Utc::now()) => Ok(session),
            _ => Err(AuthError::SessionNotFound),
        }
    }

    async fn resolve_index(&self, index_key: String) -> Result<SessionId, AuthError> {
        let mut conn = self.connection.clone();
        let id: Option<String> = conn.get(index_key).await?;
        id.and_then(|raw| raw.parse().ok())
            .ok_or(AuthError::SessionNotFound)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    #[instrument(skip_all)]
    async fn create(&self, new_session: NewSession) -> Result<Session, AuthError> {
        let ttl_ms = new_session.ttl.num_milliseconds();
        if ttl_ms <= 0 {
            return Err(AuthError::Internal("Session TTL must be positive".to_string()));
        }

        let session = new_session.into_session(SessionId::new(), Utc::now());
        let refresh_digest = session.refresh_token.clone().unwrap_or_default();

        let mut conn = self.connection.clone();
        let _: i64 = self
            .create_script
            .key(keys::session(session.id))
            .key(keys::access_index(&session.session_token))
            .key(keys::identity_sessions(session.identity_id))
            .key(keys::refresh_index(&refresh_digest))
            .arg(ttl_ms)
            .arg(session.id.to_string())
            .arg(if session.refresh_token.is_some() { "1" } else { "0" })
            .arg(session_to_fields(&session))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(target: "auth.session", error = %e, "Failed to create session");
                AuthError::from(e)
            })?;

        debug!(
            target: "auth.session",
            session_id = %session.id,
            "Session created"
        );

        Ok(session)
    }

    #[instrument(skip_all)]
    async fn find_by_token(&self, token: &str) -> Result<Session, AuthError> {
        let digest = token_digest(token);
        let id = self.resolve_index(keys::access_index(&digest)).await?;
        let session = self.load_live(id).await?;

        // Index entries can briefly outlive a rotation
        if session.session_token != digest {
            return Err(AuthError::SessionNotFound);
        }
        Ok(session)
    }

    #[instrument(skip_all, fields(session_id = %id))]
    async fn find_by_id(&self, id: SessionId) -> Result<Session, AuthError> {
        self.load_live(id).await
    }

    #[instrument(skip_all)]
    async fn find_by_refresh_token(&self, token: &str) -> Result<Session, AuthError> {
        let digest = token_digest(token);
        let id = self.resolve_index(keys::refresh_index(&digest)).await?;
        let session = self.load_live(id).await?;

        if session.refresh_token.as_deref() != Some(digest.as_str()) {
            return Err(AuthError::SessionNotFound);
        }
        Ok(session)
    }

    #[instrument(skip_all)]
    async fn list_active(&self, identity_id: IdentityId) -> Result<Vec<Session>, AuthError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.smembers(keys::identity_sessions(identity_id)).await?;

        let now = Utc::now();
        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids.iter().filter_map(|raw| raw.parse::<SessionId>().ok()) {
            if let Some(session) = self.load(id).await? {
                if session.is_live(now) {
                    sessions.push(session);
                }
            }
        }

        sessions.sort_by(|a, b| b.login_at.cmp(&a.login_at));
        Ok(sessions)
    }

    #[instrument(skip_all, fields(session_id = %id))]
    async fn touch(&self, id: SessionId) -> Result<(), AuthError> {
        let mut conn = self.connection.clone();
        let _: i64 = self
            .touch_script
            .key(keys::session(id))
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(session_id = %id))]
    async fn rotate(
        &self,
        id: SessionId,
        expected_refresh: &str,
        new_access: &str,
        new_refresh: &str,
    ) -> Result<Session, AuthError> {
        let expected_digest = token_digest(expected_refresh);
        let access_digest = token_digest(new_access);
        let refresh_digest = token_digest(new_refresh);

        let mut conn = self.connection.clone();
        let rotated: i64 = self
            .rotate_script
            .key(keys::session(id))
            .key(keys::refresh_index(&expected_digest))
            .key(keys::access_index(&access_digest))
            .key(keys::refresh_index(&refresh_digest))
            .arg(&expected_digest)
            .arg(&access_digest)
            .arg(&refresh_digest)
            .arg(id.to_string())
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        if rotated != 1 {
            debug!(
                target: "auth.session",
                session_id = %id,
                "Rotation rejected: session not active or refresh token stale"
            );
            return Err(AuthError::SessionNotFound);
        }

        self.load_live(id).await
    }

    #[instrument(skip_all, fields(session_id = %id))]
    async fn revoke(&self, id: SessionId) -> Result<(), AuthError> {
        let mut conn = self.connection.clone();
        let revoked: i64 = self
            .revoke_script
            .key(keys::session(id))
            .arg(Utc::now().timestamp_millis())
            .arg(id.to_string())
            .invoke_async(&mut conn)
            .await?;

        if revoked == 1 {
            debug!(target: "auth.session", session_id = %id, "Session revoked");
            Ok(())
        } else {
            Err(AuthError::SessionNotFound)
        }
    }

    #[instrument(skip_all)]
    async fn revoke_all(&self, identity_id: IdentityId) -> Result<u64, AuthError> {
        let mut conn = self.connection.clone();
        let revoked: i64 = self
            .revoke_all_script
            .key(keys::identity_sessions(identity_id))
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        let revoked = u64::try_from(revoked).unwrap_or(0);
        debug!(target: "auth.session", revoked, "Revoked all sessions for identity");
        Ok(revoked)
    }
}

fn session_to_fields(session: &Session) -> Vec<String> {
    let mut fields = vec![
        "identity_id".to_string(),
        session.identity_id.to_string(),
        "session_token".to_string(),
        session.session_token.clone(),
        "status".to_string(),
        session.status.as_str().to_string(),
        "login_at".to_string(),
        session.login_at.timestamp_millis().to_string(),
        "last_activity_at".to_string(),
        session.last_activity_at.timestamp_millis().to_string(),
        "expires_at".to_string(),
        session.expires_at.timestamp_millis().to_string(),
    ];

    let optional = [
        ("refresh_token", session.refresh_token.as_ref()),
        ("ip_address", session.ip_address.as_ref()),
        ("user_agent", session.user_agent.as_ref()),
        ("device_id", session.device_id.as_ref()),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            fields.push(name.to_string());
            fields.push(value.clone());
        }
    }

    fields
}

fn session_from_fields(id: SessionId, fields: &HashMap<String, String>) -> Result<Session, AuthError> {
    let text = |name: &str| fields.get(name).cloned();
    let required = |name: &str| {
        fields
            .get(name)
            .ok_or_else(|| AuthError::Store(format!("Session record missing field {name}")))
    };
    let timestamp = |name: &str| -> Result<Option<DateTime<Utc>>, AuthError> {
        fields
            .get(name)
            .map(|raw| {
                raw.parse::<i64>()
                    .ok()
                    .and_then(DateTime::from_timestamp_millis)
                    .ok_or_else(|| AuthError::Store(format!("Invalid session timestamp {name}")))
            })
            .transpose()
    };
    let required_timestamp = |name: &str| {
        timestamp(name)?
            .ok_or_else(|| AuthError::Store(format!("Session record missing field {name}")))
    };

    Ok(Session {
        id,
        identity_id: required("identity_id")?
            .parse()
            .map_err(|_| AuthError::Store("Invalid identity id in session record".to_string()))?,
        session_token: required("session_token")?.clone(),
        refresh_token: text("refresh_token"),
        ip_address: text("ip_address"),
        user_agent: text("user_agent"),
        device_id: text("device_id"),
        status: required("status")?.parse::<SessionStatus>()?,
        login_at: required_timestamp("login_at")?,
        last_activity_at: required_timestamp("last_activity_at")?,
        expires_at: required_timestamp("expires_at")?,
        logout_at: timestamp("logout_at")?,
    })
}
