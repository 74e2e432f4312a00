//! Builders for tokens the issuer would never mint.
//!
//! Integration tests use these to check that the verifier rejects forged,
//! mis-scoped and tampered tokens. Claims are assembled as raw JSON so any
//! field can be wrong or missing.

use crate::crypto_fixtures::{test_keypair, TEST_AUDIENCE, TEST_ISSUER};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use common::types::IdentityId;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Builder for raw token claims.
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::access_for(IdentityId(42))
///     .with_roles(&["admin"])
///     .temp(true)
///     .sign_with_seed(1, TEST_KID);
/// ```
#[derive(Debug, Clone)]
pub struct TestTokenBuilder {
    claims: Map<String, Value>,
}

impl TestTokenBuilder {
    /// Claims for a well-formed token of `purpose`, valid for an hour.
    pub fn new(identity_id: IdentityId, purpose: &str) -> Self {
        let now = Utc::now();
        let claims = json!({
            "identity_id": identity_id.0,
            "roles": [],
            "permissions": [],
            "device": "web",
            "session_purpose": purpose,
            "is_temp": false,
            "jti": Uuid::new_v4().to_string(),
            "iss": TEST_ISSUER,
            "aud": [TEST_AUDIENCE],
            "iat": now.timestamp(),
            "nbf": now.timestamp(),
            "exp": (now + Duration::hours(1)).timestamp(),
        });

        let Value::Object(claims) = claims else {
            unreachable!("json! object literal");
        };
        Self { claims }
    }

    pub fn access_for(identity_id: IdentityId) -> Self {
        Self::new(identity_id, "access")
    }

    pub fn with_roles(self, roles: &[&str]) -> Self {
        self.set("roles", json!(roles))
    }

    pub fn with_permissions(self, permissions: &[&str]) -> Self {
        self.set("permissions", json!(permissions))
    }

    pub fn temp(self, is_temp: bool) -> Self {
        self.set("is_temp", json!(is_temp))
    }

    pub fn issuer(self, iss: &str) -> Self {
        self.set("iss", json!(iss))
    }

    pub fn audience(self, aud: &str) -> Self {
        self.set("aud", json!([aud]))
    }

    /// Move `exp` to `seconds` from now (negative for already expired).
    pub fn expires_in(self, seconds: i64) -> Self {
        self.set("exp", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    /// Move `nbf` to `seconds` from now.
    pub fn not_before_in(self, seconds: i64) -> Self {
        self.set("nbf", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    /// Overwrite any claim.
    pub fn set(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    pub fn without(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    pub fn claims(&self) -> Value {
        Value::Object(self.claims.clone())
    }

    /// Sign with the deterministic key for `seed`, stamping `kid` in the header.
    pub fn sign_with_seed(&self, seed: u8, kid: &str) -> String {
        let pair = test_keypair(seed).expect("test keypair");
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(kid.to_string());
        encode(&header, &self.claims(), &EncodingKey::from_ed_der(&pair.pkcs8))
            .expect("sign test token")
    }

    /// Sign with the deterministic key for `seed` and no `kid` header.
    pub fn sign_without_kid(&self, seed: u8) -> String {
        let pair = test_keypair(seed).expect("test keypair");
        let header = Header::new(Algorithm::EdDSA);
        encode(&header, &self.claims(), &EncodingKey::from_ed_der(&pair.pkcs8))
            .expect("sign test token")
    }

    /// HS256 token keyed by `secret`; an algorithm-confusion attempt.
    pub fn sign_hs256(&self, secret: &[u8], kid: &str) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(kid.to_string());
        encode(&header, &self.claims(), &EncodingKey::from_secret(secret)).expect("sign hs256")
    }

    /// `alg: none` token with an empty signature.
    pub fn unsigned(&self) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(self.claims().to_string());
        format!("{header}.{payload}.")
    }
}

/// Replace the payload segment of a signed token, keeping its signature.
pub fn tamper_payload(token: &str, claims: &Value) -> String {
    let mut parts = token.split('.');
    let header = parts.next().expect("header segment");
    let _payload = parts.next().expect("payload segment");
    let signature = parts.next().expect("signature segment");
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.{signature}")
}
