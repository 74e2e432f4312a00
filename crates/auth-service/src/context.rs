//! Typed per-request authentication context.

use crate::errors::AuthError;
use crate::sessions::SessionStore;
use crate::tokens::{Claims, TokenVerifier};
use common::types::{IdentityId, SessionId};
use serde::Serialize;

/// Who is calling and what they may do.
///
/// Built once by the access middleware (or the WebSocket handshake) from a
/// verified access token whose session is still live, then handed to handlers
/// by extractor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthContext {
    pub identity_id: IdentityId,
    pub session_id: SessionId,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<serde_json::Value>,
}

impl AuthContext {
    #[must_use]
    pub fn from_claims(claims: Claims, session_id: SessionId) -> Self {
        Self {
            identity_id: claims.identity_id,
            session_id,
            roles: claims.roles,
            permissions: claims.permissions,
            device: claims.device,
            extra_data: claims.extra_data,
        }
    }

    #[must_use]
    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|r| self.roles.iter().any(|have| have == r))
    }

    #[must_use]
    pub fn has_any_permission(&self, permissions: &[&str]) -> bool {
        permissions
            .iter()
            .any(|p| self.permissions.iter().any(|have| have == p))
    }

    /// True when every listed permission is held. An empty list is satisfied.
    #[must_use]
    pub fn has_all_permissions(&self, permissions: &[&str]) -> bool {
        permissions
            .iter()
            .all(|p| self.permissions.iter().any(|have| have == p))
    }
}

/// Verify an access token and require its session to be live.
///
/// Token validity is necessary but not sufficient: a revoked or expired
/// session fails with `SessionNotFound` even while the token's own signature
/// and expiry still check out. The session must also belong to the token's
/// identity.
///
/// # Errors
///
/// Any token error from the verifier, or `SessionNotFound`.
pub async fn authenticate_access_token(
    verifier: &TokenVerifier,
    sessions: &dyn SessionStore,
    token: &str,
) -> Result<AuthContext, AuthError> {
    let claims = verifier.verify_access_token(token)?;
    let session = sessions.find_by_token(token).await?;

    if session.identity_id != claims.identity_id {
        tracing::warn!(
            target: "auth.session",
            session_id = %session.id,
            "Session bound to a different identity than its token"
        );
        return Err(AuthError::SessionNotFound);
    }

    Ok(AuthContext::from_claims(claims, session.id))
}
