//! Auth service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Messages
//! returned to clients are intentionally generic; the actual cause is logged
//! server-side. Token failures share one client message so a caller cannot
//! probe which check rejected a forged token, but each keeps its own `code`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

/// Auth service error type.
///
/// Maps to HTTP status codes:
/// - InvalidCredentials, Token*, SessionNotFound: 401 Unauthorized
/// - PermissionDenied, AccountSuspended: 403 Forbidden
/// - AccountLocked: 429 Too Many Requests (with `Retry-After`)
/// - BadRequest: 400, NotFound: 404
/// - Store, Database, Crypto, KeyStoreUnavailable, MissingAuthContext, Internal: 500
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked until {until}")]
    AccountLocked { until: DateTime<Utc> },

    #[error("Account is not in good standing")]
    AccountSuspended,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token malformed")]
    TokenMalformed,

    #[error("Token issued for a different purpose")]
    TokenWrongPurpose,

    #[error("Token signature invalid")]
    TokenSignatureInvalid,

    /// Issuer, audience or not-before rejected.
    #[error("Token claims rejected")]
    TokenClaimsRejected,

    /// A single-use token was presented a second time.
    #[error("Token already used")]
    TokenReplayed,

    /// Covers expired, revoked and never-existed sessions alike.
    #[error("Session not found")]
    SessionNotFound,

    #[error("Permission denied")]
    PermissionDenied,

    /// A handler asked for the request's auth context on a route that does not
    /// run the auth middleware.
    #[error("Auth context missing from request")]
    MissingAuthContext,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Key store unavailable: {0}")]
    KeyStoreUnavailable(String),

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// HTTP status code for this error (for metrics recording).
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::TokenExpired
            | AuthError::TokenMalformed
            | AuthError::TokenWrongPurpose
            | AuthError::TokenSignatureInvalid
            | AuthError::TokenClaimsRejected
            | AuthError::TokenReplayed
            | AuthError::SessionNotFound => StatusCode::UNAUTHORIZED,
            AuthError::PermissionDenied | AuthError::AccountSuspended => StatusCode::FORBIDDEN,
            AuthError::AccountLocked { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::KeyStoreUnavailable(_)
            | AuthError::MissingAuthContext
            | AuthError::Store(_)
            | AuthError::Database(_)
            | AuthError::Crypto(_)
            | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::AccountLocked { .. } => "ACCOUNT_LOCKED",
            AuthError::AccountSuspended => "ACCOUNT_SUSPENDED",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::TokenMalformed => "TOKEN_MALFORMED",
            AuthError::TokenWrongPurpose => "TOKEN_WRONG_PURPOSE",
            AuthError::TokenSignatureInvalid => "TOKEN_SIGNATURE_INVALID",
            AuthError::TokenClaimsRejected => "TOKEN_CLAIMS_REJECTED",
            AuthError::TokenReplayed => "TOKEN_REPLAYED",
            AuthError::SessionNotFound => "SESSION_NOT_FOUND",
            AuthError::PermissionDenied => "PERMISSION_DENIED",
            AuthError::BadRequest(_) => "BAD_REQUEST",
            AuthError::NotFound(_) => "NOT_FOUND",
            AuthError::KeyStoreUnavailable(_) => "KEY_STORE_UNAVAILABLE",
            AuthError::Store(_) => "SESSION_STORE_ERROR",
            AuthError::Database(_) => "DATABASE_ERROR",
            AuthError::Crypto(_) => "CRYPTO_ERROR",
            AuthError::MissingAuthContext | AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for the token verification family.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            AuthError::TokenExpired
                | AuthError::TokenMalformed
                | AuthError::TokenWrongPurpose
                | AuthError::TokenSignatureInvalid
                | AuthError::TokenClaimsRejected
                | AuthError::TokenReplayed
        )
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            AuthError::InvalidCredentials => "Invalid credentials".to_string(),
            AuthError::AccountLocked { .. } => {
                "Too many failed attempts. Please try again later.".to_string()
            }
            AuthError::AccountSuspended => "This account is not active".to_string(),
            e if e.is_token_error() => INVALID_TOKEN_MESSAGE.to_string(),
            AuthError::SessionNotFound => INVALID_TOKEN_MESSAGE.to_string(),
            AuthError::PermissionDenied => {
                "You do not have permission to perform this action".to_string()
            }
            AuthError::BadRequest(reason) => reason.clone(),
            AuthError::NotFound(resource) => format!("{resource} not found"),
            AuthError::MissingAuthContext => {
                tracing::error!(
                    target: "auth.middleware",
                    "Handler requires an auth context but the route has no auth middleware"
                );
                "An internal error occurred".to_string()
            }
            AuthError::KeyStoreUnavailable(err)
            | AuthError::Store(err)
            | AuthError::Database(err)
            | AuthError::Crypto(err)
            | AuthError::Internal(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "auth.errors", code = self.code(), error = %err, "Request failed");
                "An internal error occurred".to_string()
            }
            _ => "An internal error occurred".to_string(),
        };

        let retry_after = match &self {
            AuthError::AccountLocked { until } => Some((*until - Utc::now()).num_seconds().max(1)),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
            },
        };

        let mut response = (status, Json(body)).into_response();

        if let Some(seconds) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"bundlehub-api\", error=\"invalid_token\""),
            );
        }

        response
    }
}

/// Convert sqlx errors to AuthError
impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Database(err.to_string())
    }
}

/// Convert redis errors to AuthError
impl From<redis::RedisError> for AuthError {
    fn from(err: redis::RedisError) -> Self {
        AuthError::Store(err.to_string())
    }
}
