//! Observability for the auth service.
//!
//! # Privacy by Default
//!
//! All instrumentation uses `#[instrument(skip_all)]` and explicit safe field
//! allow-listing. Fields are categorized as:
//! - **SAFE**: Can be logged in plaintext (purposes, outcomes, counts)
//! - **HASHED**: Must be SHA-256 hashed for correlation (login identifiers)
//! - **NEVER**: Must never appear in logs (passwords, tokens, keys)

pub mod metrics;

use crate::errors::AuthError;
use sha2::{Digest, Sha256};

/// Hash a field value for correlation in logs (SHA-256, first 8 hex chars)
///
/// Used for login identifiers (email addresses, phone numbers) that need
/// correlation across log entries but must not be stored in plaintext.
#[must_use]
pub fn hash_for_correlation(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let result = hasher.finalize();
    hex::encode(result.get(..4).unwrap_or_default())
}

/// Error categories for metrics labels (bounded cardinality)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid credentials, lockout, dead sessions
    Authentication,
    /// Missing role/permission, wrong token purpose, suspended account
    Authorization,
    /// Token signature, format and claim failures
    Cryptographic,
    /// Store, database and key failures
    Internal,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::Cryptographic => "cryptographic",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl From<&AuthError> for ErrorCategory {
    fn from(err: &AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials
            | AuthError::AccountLocked { .. }
            | AuthError::SessionNotFound
            | AuthError::TokenReplayed => ErrorCategory::Authentication,
            AuthError::PermissionDenied
            | AuthError::AccountSuspended
            | AuthError::TokenWrongPurpose => ErrorCategory::Authorization,
            AuthError::TokenExpired
            | AuthError::TokenMalformed
            | AuthError::TokenSignatureInvalid
            | AuthError::TokenClaimsRejected
            | AuthError::Crypto(_) => ErrorCategory::Cryptographic,
            AuthError::BadRequest(_)
            | AuthError::NotFound(_)
            | AuthError::MissingAuthContext
            | AuthError::KeyStoreUnavailable(_)
            | AuthError::Store(_)
            | AuthError::Database(_)
            | AuthError::Internal(_) => ErrorCategory::Internal,
        }
    }
}
