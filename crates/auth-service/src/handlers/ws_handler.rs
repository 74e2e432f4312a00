//! WebSocket upgrade endpoint for the Notification Hub.
//!
//! Browsers cannot set headers on an upgrade, so the access token comes in
//! the `token` query parameter. It is checked (signature, purpose and live
//! session) before the upgrade completes; a bad token never gets a socket.

use crate::context::authenticate_access_token;
use crate::errors::AuthError;
use crate::hub::socket::serve_connection;
use crate::routes::AppState;
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// GET /ws?token=...
#[instrument(skip_all, name = "auth.hub.upgrade")]
pub async fn handle_ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, AuthError> {
    let token = params.token.ok_or(AuthError::TokenMalformed)?;

    let context = authenticate_access_token(
        state.auth.verifier(),
        state.auth.sessions().as_ref(),
        &token,
    )
    .await?;

    if state.hub.is_shutting_down() {
        return Ok(StatusCode::SERVICE_UNAVAILABLE.into_response());
    }

    let hub = state.hub.clone();
    let sessions = Arc::clone(state.auth.sessions());
    Ok(ws.on_upgrade(move |socket| serve_connection(socket, hub, sessions, context)))
}
