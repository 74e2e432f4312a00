//! Auth service entry point.

use auth_service::config::Config;
use auth_service::crypto::KeyStore;
use auth_service::hub::{HubConfig, NotificationHubHandle};
use auth_service::observability::metrics::init_metrics_recorder;
use auth_service::rate_limit::RateLimitPolicy;
use auth_service::repositories::{run_migrations, PgIdentityRepository};
use auth_service::routes::{self, AppState};
use auth_service::services::{AuthBackends, AuthService, LogOnlyDelivery};
use auth_service::store::{self, RedisRateLimiter, RedisReplayGuard, RedisSessionStore};
use auth_service::tokens::{TokenIssuer, TokenVerifier};
use common::secret::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auth_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting auth service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        active_key_id = %config.active_key_id,
        jwt_clock_skew_seconds = config.jwt_clock_skew_seconds,
        lock_threshold = config.lock_threshold,
        "Configuration loaded successfully"
    );

    // Keys are required before any authenticated traffic is accepted
    let (signing_key, verification_keys) = KeyStore::load(&config)
        .map_err(|e| {
            error!("Failed to load signing keys: {}", e);
            e
        })?
        .into_parts();

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        e
    })?;

    info!("Connecting to database...");
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(config.database_url.expose_secret())
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;

    if config.run_migrations {
        run_migrations(&db_pool).await?;
        info!("Database migrations applied");
    }

    info!("Connecting to Redis...");
    let redis = store::connect(&config.redis_url).await?;

    let hub = NotificationHubHandle::spawn(HubConfig {
        mailbox_capacity: config.hub_mailbox_capacity,
        connection_buffer: config.connection_buffer,
        ping_interval: config.ws_ping_interval(),
    });

    let backends = AuthBackends {
        identities: Arc::new(PgIdentityRepository::new(db_pool)),
        sessions: Arc::new(RedisSessionStore::new(redis.clone())),
        limiter: Arc::new(RedisRateLimiter::new(
            redis.clone(),
            RateLimitPolicy {
                threshold: config.lock_threshold,
                window: config.lock_window(),
            },
        )),
        replay: Arc::new(RedisReplayGuard::new(
            redis,
            Duration::from_secs(config.jwt_clock_skew_seconds),
        )),
        delivery: Arc::new(LogOnlyDelivery),
    };

    let issuer = Arc::new(TokenIssuer::new(
        signing_key,
        config.issuer.clone(),
        config.audience.clone(),
        config.token_lifetimes(),
    ));
    let verifier = Arc::new(TokenVerifier::new(
        verification_keys,
        config.issuer.clone(),
        config.audience.clone(),
        config.jwt_clock_skew_seconds,
    ));

    let auth = Arc::new(AuthService::new(
        backends,
        issuer,
        verifier,
        hub.clone(),
        config.bcrypt_cost,
    ));

    let state = Arc::new(AppState {
        auth,
        hub: hub.clone(),
        track_session_activity: config.track_session_activity,
    });

    let app = routes::build_routes(state, Some(metrics_handle));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Auth service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // HTTP is drained; close every live socket and stop the dispatch loop
    hub.shutdown().await;

    info!("Auth service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
