//! Access middleware for protected routes.
//!
//! - `require_auth` rejects the request unless it carries a valid access
//!   token bound to a live session
//! - `optional_auth` attaches a context when it can and otherwise lets the
//!   request through anonymously
//! - `enforce` applies an [`AccessRule`] and must be layered inside one of
//!   the two above
//!
//! Handlers receive the typed [`AuthContext`] as an extractor; a handler on a
//! route without auth middleware gets `MissingAuthContext` (500), not a panic.

use crate::context::{authenticate_access_token, AuthContext};
use crate::errors::AuthError;
use crate::sessions::SessionStore;
use crate::tokens::TokenVerifier;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::IntoResponse,
};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthLayerState {
    pub verifier: Arc<TokenVerifier>,
    pub sessions: Arc<dyn SessionStore>,
    /// Bump the session's `last_activity_at` on every authenticated request.
    pub track_activity: bool,
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "auth.middleware", "Missing Authorization header");
            AuthError::TokenMalformed
        })?;

    auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::debug!(target: "auth.middleware", "Invalid Authorization header format");
        AuthError::TokenMalformed
    })
}

async fn authenticate(state: &AuthLayerState, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
    let token = extract_bearer_token(headers)?;
    let context =
        authenticate_access_token(&state.verifier, state.sessions.as_ref(), token).await?;

    if state.track_activity {
        if let Err(e) = state.sessions.touch(context.session_id).await {
            tracing::warn!(target: "auth.middleware", error = %e, "Failed to record session activity");
        }
    }

    Ok(context)
}

/// Reject unless the bearer token verifies as an access token and its
/// session is live. On success the [`AuthContext`] goes into the request
/// extensions.
#[instrument(skip_all, name = "auth.middleware.require")]
pub async fn require_auth(
    State(state): State<Arc<AuthLayerState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, AuthError> {
    let context = authenticate(&state, req.headers()).await?;
    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}

/// Like `require_auth`, but a missing or bad token leaves the request
/// anonymous instead of rejecting it.
#[instrument(skip_all, name = "auth.middleware.optional")]
pub async fn optional_auth(
    State(state): State<Arc<AuthLayerState>>,
    mut req: Request,
    next: Next,
) -> impl IntoResponse {
    if req.headers().contains_key(header::AUTHORIZATION) {
        match authenticate(&state, req.headers()).await {
            Ok(context) => {
                req.extensions_mut().insert(context);
            }
            Err(e) => {
                tracing::debug!(target: "auth.middleware", code = e.code(), "Optional auth ignored token");
            }
        }
    }
    next.run(req).await
}

/// Authorization predicate evaluated against the request's [`AuthContext`].
#[derive(Debug, Clone, Copy)]
pub enum AccessRule {
    AnyRole(&'static [&'static str]),
    AnyPermission(&'static [&'static str]),
    AllPermissions(&'static [&'static str]),
}

impl AccessRule {
    #[must_use]
    pub fn permits(&self, context: &AuthContext) -> bool {
        match self {
            AccessRule::AnyRole(roles) => context.has_any_role(roles),
            AccessRule::AnyPermission(perms) => context.has_any_permission(perms),
            AccessRule::AllPermissions(perms) => context.has_all_permissions(perms),
        }
    }
}

/// Apply an [`AccessRule`]. Layer with
/// `middleware::from_fn_with_state(rule, enforce)` inside an auth layer.
pub async fn enforce(
    State(rule): State<AccessRule>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, AuthError> {
    let context = req
        .extensions()
        .get::<AuthContext>()
        .ok_or(AuthError::MissingAuthContext)?;

    if !rule.permits(context) {
        tracing::info!(
            target: "auth.middleware",
            identity_id = %context.identity_id,
            rule = ?rule,
            "Request denied by access rule"
        );
        return Err(AuthError::PermissionDenied);
    }

    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AuthError::MissingAuthContext)
    }
}

/// The caller's context when `optional_auth` found one.
#[derive(Debug, Clone)]
pub struct OptionalAuth(pub Option<AuthContext>);

#[async_trait]
impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuth(parts.extensions.get::<AuthContext>().cloned()))
    }
}
