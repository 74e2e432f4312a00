use super::{Claims, Purpose};
use crate::crypto::VerificationKeys;
use crate::errors::AuthError;
use crate::observability::{metrics::record_token_validation, ErrorCategory};
use common::jwt::{inspect_eddsa_header, JwtHeaderError};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, Validation};
use tracing::instrument;

/// Verifies tokens minted by [`super::TokenIssuer`].
///
/// Order of checks:
/// 1. Size limit and declared algorithm (`EdDSA` only), before any key lookup
/// 2. Key selection by header `kid` (active key when absent)
/// 3. Signature
/// 4. `exp`/`nbf` with the configured leeway, then exact `iss` and `aud`
/// 5. Purpose and `is_temp` rule, for the purpose-specific entry points
///
/// The verifier never consults the session store. Callers that need session
/// liveness (access middleware, hub authentication) check it separately.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    keys: VerificationKeys,
    issuer: String,
    audience: String,
    leeway_seconds: u64,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(
        keys: VerificationKeys,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        leeway_seconds: u64,
    ) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            audience: audience.into(),
            leeway_seconds,
        }
    }

    /// Verify signature, issuer, audience and time window. Purpose is not
    /// checked.
    ///
    /// # Errors
    ///
    /// - `TokenMalformed` - oversized, unparseable, wrong algorithm or bad claim shape
    /// - `TokenSignatureInvalid` - unknown `kid` or signature mismatch
    /// - `TokenExpired` - past `exp` (plus leeway)
    /// - `TokenClaimsRejected` - wrong `iss`/`aud` or before `nbf`
    #[instrument(skip_all)]
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let result = self.verify_inner(token);
        match &result {
            Ok(_) => record_token_validation("any", "success", None),
            Err(e) => record_token_validation("any", "error", Some(ErrorCategory::from(e).as_str())),
        }
        result
    }

    fn verify_inner(&self, token: &str) -> Result<Claims, AuthError> {
        let header = inspect_eddsa_header(token).map_err(|e| match e {
            JwtHeaderError::TokenTooLarge
            | JwtHeaderError::MalformedToken
            | JwtHeaderError::UnexpectedAlgorithm(_) => AuthError::TokenMalformed,
        })?;

        let key = self.keys.select(header.kid.as_deref()).ok_or_else(|| {
            tracing::debug!(
                target: "auth.crypto",
                kid = ?header.kid,
                "Token rejected: unknown key id"
            );
            AuthError::TokenSignatureInvalid
        })?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = self.leeway_seconds;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud"]);

        let data = decode::<Claims>(token, key, &validation).map_err(|e| {
            tracing::debug!(target: "auth.crypto", error = %e, "Token verification failed");
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                ErrorKind::InvalidSignature => AuthError::TokenSignatureInvalid,
                ErrorKind::InvalidIssuer
                | ErrorKind::InvalidAudience
                | ErrorKind::ImmatureSignature => AuthError::TokenClaimsRejected,
                _ => AuthError::TokenMalformed,
            }
        })?;

        Ok(data.claims)
    }

    /// Verify and require `purpose`, applying the purpose's `is_temp` rule.
    ///
    /// # Errors
    ///
    /// Everything [`Self::verify`] returns, plus `TokenWrongPurpose`.
    pub fn verify_purpose(&self, token: &str, purpose: Purpose) -> Result<Claims, AuthError> {
        let claims = self.verify_inner(token).inspect_err(|e| {
            record_token_validation(purpose.as_str(), "error", Some(ErrorCategory::from(e).as_str()));
        })?;

        if claims.session_purpose != purpose {
            tracing::debug!(
                target: "auth.crypto",
                expected = %purpose,
                actual = %claims.session_purpose,
                "Token rejected: purpose mismatch"
            );
            record_token_validation(purpose.as_str(), "error", Some(ErrorCategory::Authorization.as_str()));
            return Err(AuthError::TokenWrongPurpose);
        }

        if !purpose.accepts_temp(claims.is_temp) {
            tracing::debug!(
                target: "auth.crypto",
                purpose = %purpose,
                is_temp = claims.is_temp,
                "Token rejected: temporary flag not allowed for purpose"
            );
            record_token_validation(purpose.as_str(), "error", Some(ErrorCategory::Authorization.as_str()));
            return Err(AuthError::TokenWrongPurpose);
        }

        record_token_validation(purpose.as_str(), "success", None);
        Ok(claims)
    }

    /// General API access. Temporary tokens are always rejected.
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_purpose(token, Purpose::Access)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_purpose(token, Purpose::Refresh)
    }

    /// Password reset. Only temporary tokens are accepted.
    pub fn verify_password_reset_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_purpose(token, Purpose::PasswordReset)
    }

    pub fn verify_email_verification_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_purpose(token, Purpose::EmailVerification)
    }

    pub fn verify_phone_verification_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_purpose(token, Purpose::PhoneVerification)
    }

    pub fn verify_magic_link_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_purpose(token, Purpose::MagicLink)
    }
}
