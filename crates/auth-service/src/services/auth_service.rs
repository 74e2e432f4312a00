//! Auth orchestrator: login, logout, refresh, password reset, email/phone
//! verification, magic links and administrative standing changes.
//!
//! This is the only writer of identity state transitions. It composes the
//! issuer and verifier with the session store, rate limiter, replay guard,
//! identity repository and the hub (for revocation propagation to live
//! sockets).

use super::delivery::{DeliveryChannel, OutOfBandToken, TokenDelivery};
use crate::context::AuthContext;
use crate::crypto::{hash_password, verify_against_dummy, verify_password};
use crate::errors::AuthError;
use crate::hub::NotificationHubHandle;
use crate::observability::hash_for_correlation;
use crate::observability::metrics::{
    record_login, record_rate_limit_decision, record_session_created, record_session_revocations,
    record_token_replay,
};
use crate::rate_limit::{login_key, RateLimiter};
use crate::repositories::{Identity, IdentityRepository, Standing};
use crate::sessions::{NewSession, Session, SessionStore};
use crate::tokens::{Claims, IssuedToken, Purpose, ReplayGuard, TokenIssuer, TokenSubject, TokenVerifier};
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use common::types::{IdentityId, SessionId};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

pub const MIN_PASSWORD_LENGTH: usize = 8;
/// bcrypt ignores input past 72 bytes.
pub const MAX_PASSWORD_LENGTH: usize = 72;

/// External boundaries the orchestrator drives.
#[derive(Clone)]
pub struct AuthBackends {
    pub identities: Arc<dyn IdentityRepository>,
    pub sessions: Arc<dyn SessionStore>,
    pub limiter: Arc<dyn RateLimiter>,
    pub replay: Arc<dyn ReplayGuard>,
    pub delivery: Arc<dyn TokenDelivery>,
}

/// Where a login comes from.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub device: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
}

pub struct LoginRequest {
    pub identifier: String,
    pub password: SecretString,
    pub client: ClientInfo,
}

/// A session and the token pair bound to it.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub identity_id: IdentityId,
    pub session_id: SessionId,
    pub access: IssuedToken,
    pub refresh: IssuedToken,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

/// Result of an administrative standing change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandingChange {
    pub standing: Standing,
    pub revoked_sessions: u64,
    pub closed_connections: usize,
}

pub struct AuthService {
    backends: AuthBackends,
    issuer: Arc<TokenIssuer>,
    verifier: Arc<TokenVerifier>,
    hub: NotificationHubHandle,
    bcrypt_cost: u32,
}

impl AuthService {
    #[must_use]
    pub fn new(
        backends: AuthBackends,
        issuer: Arc<TokenIssuer>,
        verifier: Arc<TokenVerifier>,
        hub: NotificationHubHandle,
        bcrypt_cost: u32,
    ) -> Self {
        Self {
            backends,
            issuer,
            verifier,
            hub,
            bcrypt_cost,
        }
    }

    #[must_use]
    pub fn verifier(&self) -> &Arc<TokenVerifier> {
        &self.verifier
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.backends.sessions
    }

    #[must_use]
    pub fn hub(&self) -> &NotificationHubHandle {
        &self.hub
    }

    // ------------------------------------------------------------------------
    // Login / logout / refresh
    // ------------------------------------------------------------------------

    /// Credential login.
    ///
    /// Order: lock check, credential check (dummy bcrypt for unknown
    /// identifiers), failure recording, counter reset, standing check, then
    /// session creation and token minting. A locked key is rejected even when
    /// the password is right, and its counter is left alone.
    ///
    /// # Errors
    ///
    /// `AccountLocked`, `InvalidCredentials`, `AccountSuspended`, or a backend
    /// failure.
    #[instrument(skip_all, fields(identifier_hash = %hash_for_correlation(&request.identifier)))]
    pub async fn login(&self, request: LoginRequest) -> Result<SessionTokens, AuthError> {
        let start = Instant::now();
        let result = self.login_inner(request).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(AuthError::InvalidCredentials) => "invalid_credentials",
            Err(AuthError::AccountLocked { .. }) => "locked",
            Err(AuthError::AccountSuspended) => "suspended",
            Err(_) => "error",
        };
        record_login(outcome, start.elapsed());

        result
    }

    async fn login_inner(&self, request: LoginRequest) -> Result<SessionTokens, AuthError> {
        let key = login_key(&request.identifier);

        let status = self.backends.limiter.status(&key).await?;
        if status.locked {
            record_rate_limit_decision("rejected");
            warn!(target: "auth.rate_limit", "Login rejected: key is locked");
            return Err(AuthError::AccountLocked {
                until: status.locked_until.unwrap_or_else(Utc::now),
            });
        }
        record_rate_limit_decision("allowed");

        let identity = self
            .backends
            .identities
            .find_by_login(&request.identifier)
            .await?;

        let password = request.password.expose_secret();
        let verified = match &identity {
            Some(identity) => verify_password(password, &identity.password_hash)?,
            None => {
                verify_against_dummy(password, self.bcrypt_cost);
                false
            }
        };

        let identity = match identity {
            Some(identity) if verified => identity,
            _ => {
                let lock = self.backends.limiter.check_and_record_failure(&key).await?;
                warn!(
                    target: "auth.rate_limit",
                    failed_count = lock.failed_count,
                    locked = lock.locked,
                    "Login failed"
                );
                if lock.locked {
                    record_rate_limit_decision("locked");
                    return Err(AuthError::AccountLocked {
                        until: lock.locked_until.unwrap_or_else(Utc::now),
                    });
                }
                return Err(AuthError::InvalidCredentials);
            }
        };

        self.backends.limiter.reset(&key).await?;

        if !identity.standing.permits_sessions() {
            info!(
                target: "auth.service",
                identity_id = %identity.id,
                standing = %identity.standing,
                "Login refused for identity not in good standing"
            );
            return Err(AuthError::AccountSuspended);
        }

        let tokens = self.establish_session(&identity, request.client).await?;

        if let Err(e) = self.backends.identities.record_login(identity.id).await {
            warn!(target: "auth.service", error = %e, "Failed to record last login");
        }

        info!(
            target: "auth.service",
            identity_id = %identity.id,
            session_id = %tokens.session_id,
            "Login succeeded"
        );
        Ok(tokens)
    }

    /// End the caller's session and close its live sockets.
    #[instrument(skip_all, fields(session_id = %context.session_id))]
    pub async fn logout(&self, context: &AuthContext) -> Result<(), AuthError> {
        self.backends.sessions.revoke(context.session_id).await?;
        record_session_revocations("single", 1);

        let closed = self.hub.disconnect_session(context.session_id).await;
        info!(target: "auth.service", closed_connections = closed, "Logged out");
        Ok(())
    }

    /// End every session of the caller's identity and close its sockets.
    #[instrument(skip_all)]
    pub async fn logout_all(&self, context: &AuthContext) -> Result<u64, AuthError> {
        let revoked = self.revoke_everywhere(context.identity_id, "all").await?;
        Ok(revoked.0)
    }

    /// Rotate a session's token pair.
    ///
    /// The refresh token must verify, belong to a live session of the same
    /// identity, and still be that session's current refresh token. Roles and
    /// permissions are re-read so grants changed since login take effect.
    ///
    /// # Errors
    ///
    /// Token errors, `SessionNotFound`, or `AccountSuspended`.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<SessionTokens, AuthError> {
        let claims = self.verifier.verify_refresh_token(refresh_token)?;
        let session = self
            .backends
            .sessions
            .find_by_refresh_token(refresh_token)
            .await?;
        if session.identity_id != claims.identity_id {
            return Err(AuthError::SessionNotFound);
        }

        let identity = self
            .backends
            .identities
            .find_by_id(claims.identity_id)
            .await?
            .ok_or(AuthError::SessionNotFound)?;
        if !identity.standing.permits_sessions() {
            return Err(AuthError::AccountSuspended);
        }

        let subject = self
            .subject_for(&identity)
            .await?
            .with_device(claims.device.clone());
        let access = self.issuer.issue(&subject, Purpose::Access, false, None)?;
        let refresh = self.issuer.issue(&subject, Purpose::Refresh, false, None)?;

        self.backends
            .sessions
            .rotate(session.id, refresh_token, &access.token, &refresh.token)
            .await?;

        debug!(target: "auth.service", session_id = %session.id, "Session tokens rotated");

        Ok(SessionTokens {
            identity_id: identity.id,
            session_id: session.id,
            access,
            refresh,
            roles: subject.roles,
            permissions: subject.permissions,
        })
    }

    // ------------------------------------------------------------------------
    // Password reset
    // ------------------------------------------------------------------------

    /// Send a password reset token. Unknown identifiers and identities not in
    /// good standing succeed silently so the endpoint cannot enumerate
    /// accounts.
    #[instrument(skip_all, fields(identifier_hash = %hash_for_correlation(identifier)))]
    pub async fn request_password_reset(&self, identifier: &str) -> Result<(), AuthError> {
        let Some(identity) = self.deliverable_identity(identifier).await? else {
            return Ok(());
        };
        let Some((channel, destination)) = contact_for(&identity, identifier) else {
            return Ok(());
        };

        let subject = TokenSubject::new(identity.id);
        let issued = self.issuer.issue(&subject, Purpose::PasswordReset, true, None)?;
        self.send_out_of_band(identity.id, channel, destination, issued)
            .await
    }

    /// Set a new password with a reset token, then revoke every session.
    ///
    /// The password is validated before the token is consumed, so a rejected
    /// password does not burn the token.
    ///
    /// # Errors
    ///
    /// Token errors (including `TokenReplayed`), or `BadRequest` for an
    /// unacceptable password.
    #[instrument(skip_all)]
    pub async fn confirm_password_reset(
        &self,
        token: &str,
        new_password: &SecretString,
    ) -> Result<(), AuthError> {
        let claims = self.verifier.verify_password_reset_token(token)?;
        validate_new_password(new_password.expose_secret())?;
        self.consume_once(&claims).await?;

        let hash = hash_password(new_password.expose_secret(), self.bcrypt_cost)?;
        self.backends
            .identities
            .set_password_hash(claims.identity_id, &hash)
            .await?;

        let (revoked, _) = self.revoke_everywhere(claims.identity_id, "all").await?;
        info!(
            target: "auth.service",
            identity_id = %claims.identity_id,
            revoked_sessions = revoked,
            "Password reset completed"
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Email / phone verification
    // ------------------------------------------------------------------------

    /// Send an email verification token for the caller's current email.
    #[instrument(skip_all)]
    pub async fn request_email_verification(&self, context: &AuthContext) -> Result<(), AuthError> {
        let identity = self.require_identity(context.identity_id).await?;
        let email = identity
            .email
            .clone()
            .ok_or_else(|| AuthError::BadRequest("No email address on file".to_string()))?;
        if identity.email_verified {
            return Err(AuthError::BadRequest("Email address already verified".to_string()));
        }

        let subject = TokenSubject::new(identity.id).with_device(context.device.clone());
        let issued = self.issuer.issue(
            &subject,
            Purpose::EmailVerification,
            true,
            Some(json!({ "email": email })),
        )?;
        self.send_out_of_band(identity.id, DeliveryChannel::Email, email, issued)
            .await
    }

    /// Mark the email carried by the token verified.
    ///
    /// # Errors
    ///
    /// Token errors, or `BadRequest` if the identity's email changed since
    /// the token was issued.
    #[instrument(skip_all)]
    pub async fn confirm_email_verification(&self, token: &str) -> Result<IdentityId, AuthError> {
        let claims = self.verifier.verify_email_verification_token(token)?;
        let email = claims
            .extra_str("email")
            .ok_or(AuthError::TokenMalformed)?
            .to_string();
        self.consume_once(&claims).await?;

        let updated = self
            .backends
            .identities
            .mark_email_verified(claims.identity_id, &email)
            .await?;
        if !updated {
            return Err(AuthError::BadRequest(
                "Email address changed since verification was requested".to_string(),
            ));
        }

        info!(target: "auth.service", identity_id = %claims.identity_id, "Email verified");
        Ok(claims.identity_id)
    }

    /// Send a phone verification token for the caller's current phone.
    #[instrument(skip_all)]
    pub async fn request_phone_verification(&self, context: &AuthContext) -> Result<(), AuthError> {
        let identity = self.require_identity(context.identity_id).await?;
        let phone = identity
            .phone
            .clone()
            .ok_or_else(|| AuthError::BadRequest("No phone number on file".to_string()))?;
        if identity.phone_verified {
            return Err(AuthError::BadRequest("Phone number already verified".to_string()));
        }

        let subject = TokenSubject::new(identity.id).with_device(context.device.clone());
        let issued = self.issuer.issue(
            &subject,
            Purpose::PhoneVerification,
            true,
            Some(json!({ "phone": phone })),
        )?;
        self.send_out_of_band(identity.id, DeliveryChannel::Sms, phone, issued)
            .await
    }

    /// Mark the phone number carried by the token verified.
    #[instrument(skip_all)]
    pub async fn confirm_phone_verification(&self, token: &str) -> Result<IdentityId, AuthError> {
        let claims = self.verifier.verify_phone_verification_token(token)?;
        let phone = claims
            .extra_str("phone")
            .ok_or(AuthError::TokenMalformed)?
            .to_string();
        self.consume_once(&claims).await?;

        let updated = self
            .backends
            .identities
            .mark_phone_verified(claims.identity_id, &phone)
            .await?;
        if !updated {
            return Err(AuthError::BadRequest(
                "Phone number changed since verification was requested".to_string(),
            ));
        }

        info!(target: "auth.service", identity_id = %claims.identity_id, "Phone verified");
        Ok(claims.identity_id)
    }

    // ------------------------------------------------------------------------
    // Magic link
    // ------------------------------------------------------------------------

    /// Send a passwordless login link. Silent for unknown identifiers.
    #[instrument(skip_all, fields(identifier_hash = %hash_for_correlation(identifier)))]
    pub async fn request_magic_link(&self, identifier: &str) -> Result<(), AuthError> {
        let Some(identity) = self.deliverable_identity(identifier).await? else {
            return Ok(());
        };
        let Some((channel, destination)) = contact_for(&identity, identifier) else {
            return Ok(());
        };

        let subject = TokenSubject::new(identity.id);
        let issued = self.issuer.issue(&subject, Purpose::MagicLink, true, None)?;
        self.send_out_of_band(identity.id, channel, destination, issued)
            .await
    }

    /// Exchange a magic link for a new session.
    ///
    /// # Errors
    ///
    /// Token errors (including `TokenReplayed`), `InvalidCredentials` for an
    /// identity that no longer exists, or `AccountSuspended`.
    #[instrument(skip_all)]
    pub async fn consume_magic_link(
        &self,
        token: &str,
        client: ClientInfo,
    ) -> Result<SessionTokens, AuthError> {
        let claims = self.verifier.verify_magic_link_token(token)?;
        self.consume_once(&claims).await?;

        let identity = self
            .backends
            .identities
            .find_by_id(claims.identity_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !identity.standing.permits_sessions() {
            return Err(AuthError::AccountSuspended);
        }

        let tokens = self.establish_session(&identity, client).await?;
        if let Err(e) = self.backends.identities.record_login(identity.id).await {
            warn!(target: "auth.service", error = %e, "Failed to record last login");
        }

        info!(
            target: "auth.service",
            identity_id = %identity.id,
            session_id = %tokens.session_id,
            "Magic link login succeeded"
        );
        Ok(tokens)
    }

    // ------------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------------

    /// Change an identity's standing. Suspension and deactivation revoke every
    /// session and close every live socket of the identity.
    ///
    /// # Errors
    ///
    /// `NotFound` if the identity does not exist.
    #[instrument(skip_all, fields(identity_id = %identity_id, standing = %standing))]
    pub async fn set_standing(
        &self,
        identity_id: IdentityId,
        standing: Standing,
    ) -> Result<StandingChange, AuthError> {
        if !self
            .backends
            .identities
            .set_standing(identity_id, standing)
            .await?
        {
            return Err(AuthError::NotFound("Identity".to_string()));
        }

        let (revoked_sessions, closed_connections) = if standing.permits_sessions() {
            (0, 0)
        } else {
            self.revoke_everywhere(identity_id, "standing").await?
        };

        info!(
            target: "auth.service",
            revoked_sessions,
            closed_connections,
            "Identity standing changed"
        );

        Ok(StandingChange {
            standing,
            revoked_sessions,
            closed_connections,
        })
    }

    /// Live sessions of an identity.
    pub async fn list_sessions(&self, identity_id: IdentityId) -> Result<Vec<Session>, AuthError> {
        self.backends.sessions.list_active(identity_id).await
    }

    /// Revoke one session by id and close its sockets.
    ///
    /// # Errors
    ///
    /// `NotFound` if the session is not live.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn revoke_session(&self, session_id: SessionId) -> Result<(), AuthError> {
        self.backends
            .sessions
            .revoke(session_id)
            .await
            .map_err(|e| match e {
                AuthError::SessionNotFound => AuthError::NotFound("Session".to_string()),
                other => other,
            })?;
        record_session_revocations("single", 1);
        self.hub.disconnect_session(session_id).await;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn subject_for(&self, identity: &Identity) -> Result<TokenSubject, AuthError> {
        let roles = self.backends.identities.roles(identity.id).await?;
        let permissions = self.backends.identities.permissions(identity.id).await?;
        Ok(TokenSubject::new(identity.id)
            .with_roles(roles)
            .with_permissions(permissions))
    }

    /// Revoke a session whose tokens were never handed out.
    ///
    /// Already gone is fine (a concurrent revoke-all got there first). Any
    /// other failure leaves a live session behind and is returned.
    async fn discard_session(&self, session_id: SessionId) -> Result<(), AuthError> {
        match self.backends.sessions.revoke(session_id).await {
            Ok(()) | Err(AuthError::SessionNotFound) => Ok(()),
            Err(e) => {
                warn!(
                    target: "auth.service",
                    session_id = %session_id,
                    error = %e,
                    "Failed to revoke session created during a standing change"
                );
                Err(e)
            }
        }
    }

    /// Mint an access/refresh pair and record the session they are bound to.
    async fn establish_session(
        &self,
        identity: &Identity,
        client: ClientInfo,
    ) -> Result<SessionTokens, AuthError> {
        let subject = self
            .subject_for(identity)
            .await?
            .with_device(client.device.clone());

        let access = self.issuer.issue(&subject, Purpose::Access, false, None)?;
        let refresh = self.issuer.issue(&subject, Purpose::Refresh, false, None)?;

        let session = self
            .backends
            .sessions
            .create(NewSession {
                identity_id: identity.id,
                session_token: access.token.clone(),
                refresh_token: Some(refresh.token.clone()),
                ip_address: client.ip_address,
                user_agent: client.user_agent,
                device_id: client.device_id,
                ttl: self.issuer.lifetimes().refresh,
            })
            .await?;
        record_session_created();

        // A suspension that landed between the standing check and the create
        // has already run its revoke-all; make sure this session does not
        // outlive it.
        let permitted = match self.backends.identities.find_by_id(identity.id).await {
            Ok(current) => current.is_some_and(|i| i.standing.permits_sessions()),
            Err(e) => {
                self.discard_session(session.id).await?;
                return Err(e);
            }
        };
        if !permitted {
            self.discard_session(session.id).await?;
            return Err(AuthError::AccountSuspended);
        }

        Ok(SessionTokens {
            identity_id: identity.id,
            session_id: session.id,
            access,
            refresh,
            roles: subject.roles,
            permissions: subject.permissions,
        })
    }

    async fn revoke_everywhere(
        &self,
        identity_id: IdentityId,
        scope: &str,
    ) -> Result<(u64, usize), AuthError> {
        let revoked = self.backends.sessions.revoke_all(identity_id).await?;
        record_session_revocations(scope, revoked);
        let closed = self.hub.disconnect_identity(identity_id).await;
        Ok((revoked, closed))
    }

    async fn consume_once(&self, claims: &Claims) -> Result<(), AuthError> {
        let expires_at = DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now);
        self.backends
            .replay
            .consume(&claims.jti, expires_at)
            .await
            .inspect_err(|e| {
                if matches!(e, AuthError::TokenReplayed) {
                    record_token_replay(claims.session_purpose.as_str());
                }
            })
    }

    async fn require_identity(&self, id: IdentityId) -> Result<Identity, AuthError> {
        self.backends
            .identities
            .find_by_id(id)
            .await?
            .ok_or_else(|| AuthError::NotFound("Identity".to_string()))
    }

    async fn deliverable_identity(&self, identifier: &str) -> Result<Option<Identity>, AuthError> {
        let identity = self.backends.identities.find_by_login(identifier).await?;
        match identity {
            Some(identity) if identity.standing.permits_sessions() => Ok(Some(identity)),
            _ => {
                debug!(target: "auth.service", "No deliverable identity for request");
                Ok(None)
            }
        }
    }

    async fn send_out_of_band(
        &self,
        identity_id: IdentityId,
        channel: DeliveryChannel,
        destination: String,
        issued: IssuedToken,
    ) -> Result<(), AuthError> {
        self.backends
            .delivery
            .deliver(OutOfBandToken {
                identity_id,
                purpose: issued.purpose,
                channel,
                destination,
                token: issued.token,
                expires_at: issued.expires_at,
            })
            .await
    }
}

/// Pick where to send a token: the contact the caller identified with.
fn contact_for(identity: &Identity, identifier: &str) -> Option<(DeliveryChannel, String)> {
    if identifier.contains('@') {
        identity
            .email
            .clone()
            .map(|email| (DeliveryChannel::Email, email))
    } else {
        identity.phone.clone().map(|phone| (DeliveryChannel::Sms, phone))
    }
}

fn validate_new_password(password: &str) -> Result<(), AuthError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(AuthError::BadRequest(format!(
            "Password must be at most {MAX_PASSWORD_LENGTH} bytes"
        )));
    }
    Ok(())
}
