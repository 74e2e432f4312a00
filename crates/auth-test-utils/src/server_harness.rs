//! Test server harness for E2E testing
//!
//! Provides `TestAuthServer`, which wires the real router, orchestrator and
//! hub to in-memory backends and serves it on an ephemeral port.

use crate::crypto_fixtures::test_issuer_and_verifier;
use crate::memory::{
    CapturingDelivery, InMemoryIdentityRepository, InMemoryRateLimiter, InMemoryReplayGuard,
    InMemorySessionStore,
};
use crate::test_ids::*;
use auth_service::hub::{HubConfig, NotificationHubHandle};
use auth_service::rate_limit::RateLimitPolicy;
use auth_service::routes::{self, AppState};
use auth_service::services::{AuthBackends, AuthService};
use auth_service::tokens::TokenLifetimes;
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Knobs a test may turn before the server starts.
#[derive(Debug, Clone)]
pub struct TestServerOptions {
    pub lifetimes: TokenLifetimes,
    pub hub: HubConfig,
    pub lock_threshold: u32,
    pub lock_window: Duration,
    pub track_session_activity: bool,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            lifetimes: TokenLifetimes::default(),
            hub: HubConfig::default(),
            lock_threshold: 5,
            lock_window: Duration::from_secs(15 * 60),
            track_session_activity: true,
        }
    }
}

/// Test harness for spawning the auth service in E2E tests
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_login_e2e() -> Result<()> {
///     let server = TestAuthServer::spawn().await?;
///     let body = server.login(AGENT_EMAIL, AGENT_PASSWORD).await?;
///     assert_eq!(body["identity_id"], 42);
///     Ok(())
/// }
/// ```
pub struct TestAuthServer {
    addr: SocketAddr,
    router: Router,
    auth: Arc<AuthService>,
    hub: NotificationHubHandle,
    pub sessions: Arc<InMemorySessionStore>,
    pub limiter: Arc<InMemoryRateLimiter>,
    pub replay: Arc<InMemoryReplayGuard>,
    pub identities: Arc<InMemoryIdentityRepository>,
    pub delivery: Arc<CapturingDelivery>,
    client: reqwest::Client,
    _handle: JoinHandle<()>,
}

impl TestAuthServer {
    /// Spawn with default options and the fixed agent and admin identities.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(TestServerOptions::default()).await
    }

    /// Spawn a new test server instance
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Sign with the deterministic test key
    /// - Seed the agent (42) and admin (1) identities
    /// - Start the HTTP server in the background
    pub async fn spawn_with(options: TestServerOptions) -> Result<Self, anyhow::Error> {
        let sessions = Arc::new(InMemorySessionStore::new());
        let limiter = Arc::new(InMemoryRateLimiter::new(RateLimitPolicy {
            threshold: options.lock_threshold,
            window: options.lock_window,
        }));
        let replay = Arc::new(InMemoryReplayGuard::new());
        let identities = Arc::new(InMemoryIdentityRepository::new());
        let delivery = Arc::new(CapturingDelivery::new());

        identities.insert(
            test_identity(AGENT_ID, AGENT_EMAIL, AGENT_PHONE, AGENT_PASSWORD),
            AGENT_ROLES,
            AGENT_PERMISSIONS,
        );
        identities.insert(
            test_identity(ADMIN_ID, ADMIN_EMAIL, ADMIN_PHONE, ADMIN_PASSWORD),
            ADMIN_ROLES,
            ADMIN_PERMISSIONS,
        );

        let (issuer, verifier) = test_issuer_and_verifier(options.lifetimes);
        let hub = NotificationHubHandle::spawn(options.hub);

        let backends = AuthBackends {
            identities: identities.clone(),
            sessions: sessions.clone(),
            limiter: limiter.clone(),
            replay: replay.clone(),
            delivery: delivery.clone(),
        };
        let auth = Arc::new(AuthService::new(
            backends,
            Arc::new(issuer),
            Arc::new(verifier),
            hub.clone(),
            TEST_BCRYPT_COST,
        ));

        let state = Arc::new(AppState {
            auth: auth.clone(),
            hub: hub.clone(),
            track_session_activity: options.track_session_activity,
        });

        // A standalone recorder: the global one may already be installed by
        // another test in this process
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let router = routes::build_routes(state, Some(metrics_handle));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let app = router.clone();
        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            router,
            auth,
            hub,
            sessions,
            limiter,
            replay,
            identities,
            delivery,
            client: reqwest::Client::new(),
            _handle: handle,
        })
    }

    /// Base URL of the test server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket URL carrying `token` as the query parameter.
    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={}", self.addr, token)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The router, for in-process `oneshot` requests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn auth(&self) -> &Arc<AuthService> {
        &self.auth
    }

    pub fn hub(&self) -> &NotificationHubHandle {
        &self.hub
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// POST a JSON body, optionally with a bearer token.
    pub async fn post_json(
        &self,
        path: &str,
        body: &Value,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, anyhow::Error> {
        let mut request = self.client.post(format!("{}{}", self.url(), path)).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?)
    }

    /// GET with an optional bearer token.
    pub async fn get(&self, path: &str, bearer: Option<&str>) -> Result<reqwest::Response, anyhow::Error> {
        let mut request = self.client.get(format!("{}{}", self.url(), path));
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?)
    }

    /// Log in and return the token response body. Fails on a non-200.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<Value, anyhow::Error> {
        let response = self
            .post_json(
                "/api/v1/auth/login",
                &json!({ "identifier": identifier, "password": password }),
                None,
            )
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            anyhow::bail!("login failed with {}: {}", status, body);
        }
        Ok(body)
    }

    /// Log in as the fixed agent and return its access token.
    pub async fn agent_access_token(&self) -> Result<String, anyhow::Error> {
        let body = self.login(AGENT_EMAIL, AGENT_PASSWORD).await?;
        access_token(&body)
    }

    /// Log in as the fixed admin and return its access token.
    pub async fn admin_access_token(&self) -> Result<String, anyhow::Error> {
        let body = self.login(ADMIN_EMAIL, ADMIN_PASSWORD).await?;
        access_token(&body)
    }
}

fn access_token(body: &Value) -> Result<String, anyhow::Error> {
    body["access_token"]
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| anyhow::anyhow!("token response has no access_token"))
}
