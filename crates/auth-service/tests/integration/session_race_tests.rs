//! Logins racing a suspension.
//!
//! The session store below suspends the identity the moment a session is
//! written, which is the interleaving where an admin's revoke-all runs
//! between the login's standing check and its session create.

use async_trait::async_trait;
use auth_service::errors::AuthError;
use auth_service::hub::{HubConfig, NotificationHubHandle};
use auth_service::rate_limit::RateLimitPolicy;
use auth_service::repositories::{IdentityRepository, Standing};
use auth_service::services::{AuthBackends, AuthService, ClientInfo, LoginRequest};
use auth_service::sessions::{NewSession, Session, SessionStore};
use auth_service::tokens::TokenLifetimes;
use auth_test_utils::*;
use common::secret::SecretString;
use common::types::{IdentityId, SessionId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct SuspendOnCreate {
    inner: InMemorySessionStore,
    identities: Arc<InMemoryIdentityRepository>,
    fail_revoke: bool,
    revoke_calls: AtomicUsize,
    created: std::sync::Mutex<Option<SessionId>>,
}

impl SuspendOnCreate {
    fn new(identities: Arc<InMemoryIdentityRepository>, fail_revoke: bool) -> Self {
        Self {
            inner: InMemorySessionStore::new(),
            identities,
            fail_revoke,
            revoke_calls: AtomicUsize::new(0),
            created: std::sync::Mutex::new(None),
        }
    }

    fn created(&self) -> SessionId {
        self.created.lock().unwrap().expect("no session was created")
    }
}

#[async_trait]
impl SessionStore for SuspendOnCreate {
    async fn create(&self, session: NewSession) -> Result<Session, AuthError> {
        let identity_id = session.identity_id;
        let session = self.inner.create(session).await?;
        *self.created.lock().unwrap() = Some(session.id);
        self.identities
            .set_standing(identity_id, Standing::Suspended)
            .await?;
        Ok(session)
    }

    async fn find_by_token(&self, token: &str) -> Result<Session, AuthError> {
        self.inner.find_by_token(token).await
    }

    async fn find_by_id(&self, id: SessionId) -> Result<Session, AuthError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_refresh_token(&self, token: &str) -> Result<Session, AuthError> {
        self.inner.find_by_refresh_token(token).await
    }

    async fn list_active(&self, identity_id: IdentityId) -> Result<Vec<Session>, AuthError> {
        self.inner.list_active(identity_id).await
    }

    async fn touch(&self, id: SessionId) -> Result<(), AuthError> {
        self.inner.touch(id).await
    }

    async fn rotate(
        &self,
        id: SessionId,
        expected_refresh: &str,
        new_access: &str,
        new_refresh: &str,
    ) -> Result<Session, AuthError> {
        self.inner
            .rotate(id, expected_refresh, new_access, new_refresh)
            .await
    }

    async fn revoke(&self, id: SessionId) -> Result<(), AuthError> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_revoke {
            return Err(AuthError::Internal("session store unavailable".to_string()));
        }
        self.inner.revoke(id).await
    }

    async fn revoke_all(&self, identity_id: IdentityId) -> Result<u64, AuthError> {
        self.inner.revoke_all(identity_id).await
    }
}

fn service_with(sessions: Arc<SuspendOnCreate>, identities: Arc<InMemoryIdentityRepository>) -> AuthService {
    let (issuer, verifier) = test_issuer_and_verifier(TokenLifetimes::default());
    let backends = AuthBackends {
        identities,
        sessions,
        limiter: Arc::new(InMemoryRateLimiter::new(RateLimitPolicy {
            threshold: 5,
            window: Duration::from_secs(900),
        })),
        replay: Arc::new(InMemoryReplayGuard::new()),
        delivery: Arc::new(CapturingDelivery::new()),
    };
    AuthService::new(
        backends,
        Arc::new(issuer),
        Arc::new(verifier),
        NotificationHubHandle::spawn(HubConfig::default()),
        TEST_BCRYPT_COST,
    )
}

fn agent_identities() -> Arc<InMemoryIdentityRepository> {
    let identities = Arc::new(InMemoryIdentityRepository::new());
    identities.insert(
        test_identity(AGENT_ID, AGENT_EMAIL, AGENT_PHONE, AGENT_PASSWORD),
        AGENT_ROLES,
        AGENT_PERMISSIONS,
    );
    identities
}

fn agent_login() -> LoginRequest {
    LoginRequest {
        identifier: AGENT_EMAIL.to_string(),
        password: SecretString::from(AGENT_PASSWORD.to_string()),
        client: ClientInfo::default(),
    }
}

#[tokio::test]
async fn test_login_racing_suspension_leaves_no_live_session() {
    let identities = agent_identities();
    let sessions = Arc::new(SuspendOnCreate::new(identities.clone(), false));
    let service = service_with(sessions.clone(), identities);

    let result = service.login(agent_login()).await;

    assert!(matches!(result, Err(AuthError::AccountSuspended)));
    assert_eq!(sessions.revoke_calls.load(Ordering::SeqCst), 1);
    let created = sessions.created();
    assert!(matches!(
        sessions.find_by_id(created).await,
        Err(AuthError::SessionNotFound)
    ));
}

#[tokio::test]
async fn test_failed_cleanup_revoke_is_reported() {
    let identities = agent_identities();
    let sessions = Arc::new(SuspendOnCreate::new(identities.clone(), true));
    let service = service_with(sessions.clone(), identities);

    let result = service.login(agent_login()).await;

    // The store failure surfaces instead of a plain suspension answer
    match result {
        Err(AuthError::Internal(message)) => assert!(message.contains("unavailable")),
        other => panic!("expected the revoke failure, got {other:?}"),
    }
    assert_eq!(sessions.revoke_calls.load(Ordering::SeqCst), 1);
}
