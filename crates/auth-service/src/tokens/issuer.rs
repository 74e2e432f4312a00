use super::{Claims, Purpose, TokenLifetimes, TokenSubject};
use crate::crypto::SigningKey;
use crate::errors::AuthError;
use crate::observability::metrics::record_token_issuance;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, Header};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// A freshly minted token.
#[derive(Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub purpose: Purpose,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"[REDACTED]")
            .field("jti", &"[REDACTED]")
            .field("purpose", &self.purpose)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Mints EdDSA tokens with the active signing key.
///
/// The issuer holds no mutable state and is shared behind an `Arc`.
#[derive(Debug)]
pub struct TokenIssuer {
    signing_key: SigningKey,
    issuer: String,
    audience: Vec<String>,
    lifetimes: TokenLifetimes,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(
        signing_key: SigningKey,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        lifetimes: TokenLifetimes,
    ) -> Self {
        Self {
            signing_key,
            issuer: issuer.into(),
            audience: vec![audience.into()],
            lifetimes,
        }
    }

    #[must_use]
    pub fn lifetimes(&self) -> &TokenLifetimes {
        &self.lifetimes
    }

    /// Issue a token for `subject` scoped to `purpose`.
    ///
    /// Every call gets a fresh `jti`; `iat` and `nbf` are now and `exp` follows
    /// the purpose's lifetime class (forced short when `is_temp`). The header
    /// carries the active key id.
    ///
    /// # Errors
    ///
    /// `AuthError::Crypto` if signing fails.
    #[instrument(skip_all, fields(purpose = %purpose, is_temp = is_temp))]
    pub fn issue(
        &self,
        subject: &TokenSubject,
        purpose: Purpose,
        is_temp: bool,
        extra_data: Option<serde_json::Value>,
    ) -> Result<IssuedToken, AuthError> {
        let start = Instant::now();

        let now = Utc::now();
        let expires_at = now + self.lifetimes.ttl(purpose, is_temp);
        let jti = Uuid::new_v4().to_string();

        let claims = Claims {
            identity_id: subject.identity_id,
            roles: subject.roles.clone(),
            permissions: subject.permissions.clone(),
            device: subject.device.clone(),
            session_purpose: purpose,
            is_temp,
            extra_data,
            jti: jti.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.signing_key.kid().to_string());

        let result = encode(&header, &claims, self.signing_key.encoding_key()).map_err(|e| {
            tracing::error!(target: "auth.crypto", error = %e, "JWT signing operation failed");
            AuthError::Crypto(format!("JWT signing operation failed: {e}"))
        });

        let status = if result.is_ok() { "success" } else { "error" };
        record_token_issuance(purpose.as_str(), status, start.elapsed());

        Ok(IssuedToken {
            token: result?,
            jti,
            purpose,
            expires_at,
        })
    }
}
