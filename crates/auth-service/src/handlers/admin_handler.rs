//! Administrative endpoints under `/api/v1/admin`.
//!
//! Authorization is applied by the router's access rules; these handlers only
//! parse input and call the orchestrator.

use crate::errors::AuthError;
use crate::hub::{HubError, HubStats};
use crate::repositories::Standing;
use crate::routes::AppState;
use crate::services::StandingChange;
use crate::sessions::Session;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use common::types::{IdentityId, SessionId};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub identity_id: IdentityId,
    pub sessions: Vec<Session>,
}

#[derive(Debug, Serialize)]
pub struct StandingResponse {
    pub identity_id: IdentityId,
    pub standing: &'static str,
    pub revoked_sessions: u64,
    pub closed_connections: usize,
}

/// GET /api/v1/admin/identities/:id/sessions
pub async fn handle_list_sessions(
    State(state): State<Arc<AppState>>,
    Path(identity_id): Path<i64>,
) -> Result<Json<SessionListResponse>, AuthError> {
    let identity_id = IdentityId(identity_id);
    let sessions = state.auth.list_sessions(identity_id).await?;
    Ok(Json(SessionListResponse {
        identity_id,
        sessions,
    }))
}

/// DELETE /api/v1/admin/sessions/:id
pub async fn handle_revoke_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AuthError> {
    let session_id: SessionId = session_id
        .parse()
        .map_err(|_| AuthError::BadRequest("Invalid session id".to_string()))?;
    state.auth.revoke_session(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/admin/identities/:id/deactivate
pub async fn handle_deactivate(
    State(state): State<Arc<AppState>>,
    Path(identity_id): Path<i64>,
) -> Result<Json<StandingResponse>, AuthError> {
    set_standing(&state, IdentityId(identity_id), Standing::Deactivated).await
}

/// POST /api/v1/admin/identities/:id/suspend
pub async fn handle_suspend(
    State(state): State<Arc<AppState>>,
    Path(identity_id): Path<i64>,
) -> Result<Json<StandingResponse>, AuthError> {
    set_standing(&state, IdentityId(identity_id), Standing::Suspended).await
}

/// POST /api/v1/admin/identities/:id/reactivate
pub async fn handle_reactivate(
    State(state): State<Arc<AppState>>,
    Path(identity_id): Path<i64>,
) -> Result<Json<StandingResponse>, AuthError> {
    set_standing(&state, IdentityId(identity_id), Standing::Active).await
}

async fn set_standing(
    state: &AppState,
    identity_id: IdentityId,
    standing: Standing,
) -> Result<Json<StandingResponse>, AuthError> {
    let StandingChange {
        standing,
        revoked_sessions,
        closed_connections,
    } = state.auth.set_standing(identity_id, standing).await?;

    Ok(Json(StandingResponse {
        identity_id,
        standing: standing.as_str(),
        revoked_sessions,
        closed_connections,
    }))
}

/// GET /api/v1/admin/hub/stats
pub async fn handle_hub_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HubStats>, AuthError> {
    state
        .hub
        .stats()
        .await
        .map(Json)
        .map_err(|e: HubError| AuthError::Internal(e.to_string()))
}
