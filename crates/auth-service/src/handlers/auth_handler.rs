//! Identity-facing auth endpoints under `/api/v1/auth`.

use crate::context::AuthContext;
use crate::errors::AuthError;
use crate::middleware::OptionalAuth;
use crate::routes::AppState;
use crate::services::{ClientInfo, LoginRequest, SessionTokens};
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use common::secret::SecretString;
use common::types::{IdentityId, SessionId};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

const DEFAULT_DEVICE: &str = "web";

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub identifier: String,
    pub password: SecretString,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshBody {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct IdentifierBody {
    pub identifier: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenBody {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetConfirmBody {
    pub token: String,
    pub new_password: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct MagicLinkConsumeBody {
    pub token: String,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Token pair handed back by login, refresh and magic-link consumption.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Seconds until the access token expires.
    pub expires_in: i64,
    pub refresh_expires_in: i64,
    pub session_id: SessionId,
    pub identity_id: IdentityId,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl From<SessionTokens> for TokenResponse {
    fn from(tokens: SessionTokens) -> Self {
        let now = Utc::now();
        Self {
            expires_in: (tokens.access.expires_at - now).num_seconds().max(0),
            refresh_expires_in: (tokens.refresh.expires_at - now).num_seconds().max(0),
            access_token: tokens.access.token,
            refresh_token: tokens.refresh.token,
            token_type: "Bearer",
            session_id: tokens.session_id,
            identity_id: tokens.identity_id,
            roles: tokens.roles,
            permissions: tokens.permissions,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RevokedResponse {
    pub revoked_sessions: u64,
}

#[derive(Debug, Serialize)]
pub struct VerifiedResponse {
    pub identity_id: IdentityId,
    pub verified: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<IdentityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

fn client_info(
    headers: &HeaderMap,
    addr: Option<SocketAddr>,
    device: Option<String>,
    device_id: Option<String>,
) -> ClientInfo {
    ClientInfo {
        device: device
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
        ip_address: addr.map(|a| a.ip().to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(ToString::to_string),
        device_id,
    }
}

/// POST /api/v1/auth/login
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<LoginBody>,
) -> Result<Json<TokenResponse>, AuthError> {
    let client = client_info(
        &headers,
        connect_info.map(|ConnectInfo(addr)| addr),
        body.device,
        body.device_id,
    );

    let tokens = state
        .auth
        .login(LoginRequest {
            identifier: body.identifier,
            password: body.password,
            client,
        })
        .await?;

    Ok(Json(tokens.into()))
}

/// POST /api/v1/auth/logout
pub async fn handle_logout(
    State(state): State<Arc<AppState>>,
    context: AuthContext,
) -> Result<StatusCode, AuthError> {
    state.auth.logout(&context).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/auth/logout-all
pub async fn handle_logout_all(
    State(state): State<Arc<AppState>>,
    context: AuthContext,
) -> Result<Json<RevokedResponse>, AuthError> {
    let revoked_sessions = state.auth.logout_all(&context).await?;
    Ok(Json(RevokedResponse { revoked_sessions }))
}

/// POST /api/v1/auth/refresh
pub async fn handle_refresh(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<TokenResponse>, AuthError> {
    let tokens = state.auth.refresh(&body.refresh_token).await?;
    Ok(Json(tokens.into()))
}

/// POST /api/v1/auth/password-reset/request
///
/// Always 202, whether or not the identifier exists.
pub async fn handle_password_reset_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IdentifierBody>,
) -> Result<StatusCode, AuthError> {
    state.auth.request_password_reset(&body.identifier).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/v1/auth/password-reset/confirm
pub async fn handle_password_reset_confirm(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PasswordResetConfirmBody>,
) -> Result<StatusCode, AuthError> {
    state
        .auth
        .confirm_password_reset(&body.token, &body.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/auth/email-verification/request
pub async fn handle_email_verification_request(
    State(state): State<Arc<AppState>>,
    context: AuthContext,
) -> Result<StatusCode, AuthError> {
    state.auth.request_email_verification(&context).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/v1/auth/email-verification/confirm
pub async fn handle_email_verification_confirm(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TokenBody>,
) -> Result<Json<VerifiedResponse>, AuthError> {
    let identity_id = state.auth.confirm_email_verification(&body.token).await?;
    Ok(Json(VerifiedResponse {
        identity_id,
        verified: true,
    }))
}

/// POST /api/v1/auth/phone-verification/request
pub async fn handle_phone_verification_request(
    State(state): State<Arc<AppState>>,
    context: AuthContext,
) -> Result<StatusCode, AuthError> {
    state.auth.request_phone_verification(&context).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/v1/auth/phone-verification/confirm
pub async fn handle_phone_verification_confirm(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TokenBody>,
) -> Result<Json<VerifiedResponse>, AuthError> {
    let identity_id = state.auth.confirm_phone_verification(&body.token).await?;
    Ok(Json(VerifiedResponse {
        identity_id,
        verified: true,
    }))
}

/// POST /api/v1/auth/magic-link/request
///
/// Always 202, whether or not the identifier exists.
pub async fn handle_magic_link_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IdentifierBody>,
) -> Result<StatusCode, AuthError> {
    state.auth.request_magic_link(&body.identifier).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/v1/auth/magic-link/consume
pub async fn handle_magic_link_consume(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<MagicLinkConsumeBody>,
) -> Result<Json<TokenResponse>, AuthError> {
    let client = client_info(
        &headers,
        connect_info.map(|ConnectInfo(addr)| addr),
        body.device,
        body.device_id,
    );
    let tokens = state.auth.consume_magic_link(&body.token, client).await?;
    Ok(Json(tokens.into()))
}

/// GET /api/v1/auth/me
pub async fn handle_me(context: AuthContext) -> Json<AuthContext> {
    Json(context)
}

/// GET /api/v1/auth/status
pub async fn handle_status(OptionalAuth(context): OptionalAuth) -> Json<StatusResponse> {
    Json(match context {
        Some(ctx) => StatusResponse {
            authenticated: true,
            identity_id: Some(ctx.identity_id),
            roles: Some(ctx.roles),
        },
        None => StatusResponse {
            authenticated: false,
            identity_id: None,
            roles: None,
        },
    })
}
