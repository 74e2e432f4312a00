//! HTTP routes for the auth service.
//!
//! Defines the Axum router and application state.

use crate::handlers::{self, admin_handler, auth_handler, ws_handler};
use crate::hub::NotificationHubHandle;
use crate::middleware::{enforce, optional_auth, require_auth, AccessRule, AuthLayerState};
use crate::services::AuthService;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const ADMIN_SESSIONS: AccessRule = AccessRule::AnyRole(&["admin"]);
const ADMIN_STANDING: AccessRule = AccessRule::AllPermissions(&["identity:read", "identity:write"]);
const ADMIN_HUB: AccessRule = AccessRule::AnyPermission(&["hub:read", "admin:all"]);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub hub: NotificationHubHandle,
    /// Bump session activity on authenticated requests.
    pub track_session_activity: bool,
}

/// Build the application routes.
///
/// - `/health`, `/metrics` - operational, unversioned
/// - `/api/v1/auth/*` - login, refresh and token-driven flows (public)
/// - `/api/v1/auth/{logout,logout-all,me,...}` - require a live session
/// - `/api/v1/auth/status` - optional authentication
/// - `/api/v1/admin/*` - require a live session plus an access rule
/// - `/ws?token=` - authenticated WebSocket upgrade
///
/// The metrics route is omitted when no recorder handle is supplied.
pub fn build_routes(state: Arc<AppState>, metrics_handle: Option<PrometheusHandle>) -> Router {
    let auth_layer = Arc::new(AuthLayerState {
        verifier: state.auth.verifier().clone(),
        sessions: state.auth.sessions().clone(),
        track_activity: state.track_session_activity,
    });

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/auth/login", post(auth_handler::handle_login))
        .route("/api/v1/auth/refresh", post(auth_handler::handle_refresh))
        .route(
            "/api/v1/auth/password-reset/request",
            post(auth_handler::handle_password_reset_request),
        )
        .route(
            "/api/v1/auth/password-reset/confirm",
            post(auth_handler::handle_password_reset_confirm),
        )
        .route(
            "/api/v1/auth/email-verification/confirm",
            post(auth_handler::handle_email_verification_confirm),
        )
        .route(
            "/api/v1/auth/phone-verification/confirm",
            post(auth_handler::handle_phone_verification_confirm),
        )
        .route(
            "/api/v1/auth/magic-link/request",
            post(auth_handler::handle_magic_link_request),
        )
        .route(
            "/api/v1/auth/magic-link/consume",
            post(auth_handler::handle_magic_link_consume),
        )
        .route("/ws", get(ws_handler::handle_ws_upgrade))
        .with_state(state.clone());

    let optional_routes = Router::new()
        .route("/api/v1/auth/status", get(auth_handler::handle_status))
        .route_layer(middleware::from_fn_with_state(
            auth_layer.clone(),
            optional_auth,
        ))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/v1/auth/logout", post(auth_handler::handle_logout))
        .route("/api/v1/auth/logout-all", post(auth_handler::handle_logout_all))
        .route("/api/v1/auth/me", get(auth_handler::handle_me))
        .route(
            "/api/v1/auth/email-verification/request",
            post(auth_handler::handle_email_verification_request),
        )
        .route(
            "/api/v1/auth/phone-verification/request",
            post(auth_handler::handle_phone_verification_request),
        )
        .merge(admin_routes())
        .route_layer(middleware::from_fn_with_state(auth_layer, require_auth))
        .with_state(state);

    let mut app = public_routes.merge(optional_routes).merge(protected_routes);

    if let Some(handle) = metrics_handle {
        app = app.merge(
            Router::new()
                .route("/metrics", get(handlers::metrics_handler))
                .with_state(handle),
        );
    }

    // Layer order (bottom-to-top execution): timeout innermost, then tracing
    app.layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}

/// Admin routes, each group behind its own access rule. Must be nested under
/// `require_auth`.
fn admin_routes() -> Router<Arc<AppState>> {
    let sessions = Router::new()
        .route(
            "/api/v1/admin/identities/:id/sessions",
            get(admin_handler::handle_list_sessions),
        )
        .route(
            "/api/v1/admin/sessions/:id",
            delete(admin_handler::handle_revoke_session),
        )
        .route_layer(middleware::from_fn_with_state(ADMIN_SESSIONS, enforce));

    let standing = Router::new()
        .route(
            "/api/v1/admin/identities/:id/deactivate",
            post(admin_handler::handle_deactivate),
        )
        .route(
            "/api/v1/admin/identities/:id/suspend",
            post(admin_handler::handle_suspend),
        )
        .route(
            "/api/v1/admin/identities/:id/reactivate",
            post(admin_handler::handle_reactivate),
        )
        .route_layer(middleware::from_fn_with_state(ADMIN_STANDING, enforce));

    let hub = Router::new()
        .route("/api/v1/admin/hub/stats", get(admin_handler::handle_hub_stats))
        .route_layer(middleware::from_fn_with_state(ADMIN_HUB, enforce));

    sessions.merge(standing).merge(hub)
}
