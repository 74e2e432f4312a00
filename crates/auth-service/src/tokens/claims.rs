use super::Purpose;
use common::types::IdentityId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Signed token payload.
///
/// `identity_id`, `jti` and `extra_data` (which may carry an email address or
/// phone number) are redacted from Debug output.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub identity_id: IdentityId,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub device: String,
    pub session_purpose: Purpose,
    #[serde(default)]
    pub is_temp: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<serde_json::Value>,
    /// Unique token id
    pub jti: String,
    pub iss: String,
    pub aud: Vec<String>,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("identity_id", &"[REDACTED]")
            .field("roles", &self.roles)
            .field("permissions", &self.permissions)
            .field("device", &self.device)
            .field("session_purpose", &self.session_purpose)
            .field("is_temp", &self.is_temp)
            .field("extra_data", &self.extra_data.as_ref().map(|_| "[REDACTED]"))
            .field("jti", &"[REDACTED]")
            .field("iss", &self.iss)
            .field("aud", &self.aud)
            .field("iat", &self.iat)
            .field("nbf", &self.nbf)
            .field("exp", &self.exp)
            .finish()
    }
}

impl Claims {
    /// Read a string field out of `extra_data`.
    #[must_use]
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra_data.as_ref()?.get(key)?.as_str()
    }
}

/// Who a token is about: the inputs shared by every purpose.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSubject {
    pub identity_id: IdentityId,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub device: String,
}

impl TokenSubject {
    #[must_use]
    pub fn new(identity_id: IdentityId) -> Self {
        Self {
            identity_id,
            roles: Vec::new(),
            permissions: Vec::new(),
            device: String::new(),
        }
    }

    #[must_use]
    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }
}

impl fmt::Debug for TokenSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSubject")
            .field("identity_id", &"[REDACTED]")
            .field("roles", &self.roles)
            .field("permissions", &self.permissions)
            .field("device", &self.device)
            .finish()
    }
}
