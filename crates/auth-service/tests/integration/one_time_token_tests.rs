//! Password reset, email/phone verification and magic links.
//!
//! Tokens are read back from the capturing delivery, the way a user would
//! open the email or SMS.

use auth_service::services::DeliveryChannel;
use auth_service::tokens::Purpose;
use auth_test_utils::*;
use reqwest::StatusCode;
use serde_json::{json, Value};

async fn error_code(response: reqwest::Response) -> String {
    let body: Value = response.json().await.unwrap();
    body["error"]["code"].as_str().unwrap().to_string()
}

async fn confirm_reset(
    server: &TestAuthServer,
    token: &str,
    new_password: &str,
) -> Result<reqwest::Response, anyhow::Error> {
    server
        .post_json(
            "/api/v1/auth/password-reset/confirm",
            &json!({ "token": token, "new_password": new_password }),
            None,
        )
        .await
}

// ============================================================================
// Password reset
// ============================================================================

#[tokio::test]
async fn test_password_reset_full_flow() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    let before = server.login(AGENT_EMAIL, AGENT_PASSWORD).await?;

    let response = server
        .post_json(
            "/api/v1/auth/password-reset/request",
            &json!({ "identifier": AGENT_EMAIL }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let delivered = server.delivery.last(Purpose::PasswordReset).unwrap();
    assert_eq!(delivered.identity_id, AGENT_ID);
    assert_eq!(delivered.channel, DeliveryChannel::Email);
    assert_eq!(delivered.destination, AGENT_EMAIL);

    // Temporary tokens can never act as access credentials
    let response = server.get("/api/v1/auth/me", Some(&delivered.token)).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = server
        .post_json(
            "/api/v1/auth/password-reset/confirm",
            &json!({ "token": delivered.token, "new_password": "brand-new-secret" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Every existing session is gone
    let response = server
        .get("/api/v1/auth/me", before["access_token"].as_str())
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Old password fails, new one works
    assert!(server.login(AGENT_EMAIL, AGENT_PASSWORD).await.is_err());
    server.login(AGENT_EMAIL, "brand-new-secret").await?;

    Ok(())
}

#[tokio::test]
async fn test_password_reset_token_is_single_use() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    server.auth().request_password_reset(AGENT_PHONE).await?;
    let delivered = server.delivery.last(Purpose::PasswordReset).unwrap();
    assert_eq!(delivered.channel, DeliveryChannel::Sms);

    // A rejected password does not burn the token
    let weak = confirm_reset(&server, &delivered.token, "short").await?;
    assert_eq!(weak.status(), StatusCode::BAD_REQUEST);

    assert_eq!(confirm_reset(&server, &delivered.token, "first-new-password").await?.status(), StatusCode::NO_CONTENT);

    let replay = confirm_reset(&server, &delivered.token, "second-new-password").await?;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(replay).await, "TOKEN_REPLAYED");

    server.login(AGENT_EMAIL, "first-new-password").await?;
    Ok(())
}

#[tokio::test]
async fn test_password_reset_unknown_identifier_is_silent() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;

    let response = server
        .post_json(
            "/api/v1/auth/password-reset/request",
            &json!({ "identifier": UNKNOWN_EMAIL }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(server.delivery.sent().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_reset_token_rejected_by_other_confirmations() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    server.auth().request_password_reset(AGENT_EMAIL).await?;
    let token = server.delivery.last(Purpose::PasswordReset).unwrap().token;

    for path in [
        "/api/v1/auth/email-verification/confirm",
        "/api/v1/auth/phone-verification/confirm",
        "/api/v1/auth/magic-link/consume",
    ] {
        let response = server.post_json(path, &json!({ "token": token }), None).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{path}");
        assert_eq!(error_code(response).await, "TOKEN_WRONG_PURPOSE");
    }

    Ok(())
}

// ============================================================================
// Email and phone verification
// ============================================================================

#[tokio::test]
async fn test_email_verification_flow() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    let access = server.agent_access_token().await?;

    let response = server
        .post_json("/api/v1/auth/email-verification/request", &json!({}), Some(&access))
        .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let delivered = server.delivery.last(Purpose::EmailVerification).unwrap();
    assert_eq!(delivered.destination, AGENT_EMAIL);

    let response = server
        .post_json(
            "/api/v1/auth/email-verification/confirm",
            &json!({ "token": delivered.token }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["identity_id"], 42);
    assert_eq!(body["verified"], true);
    assert!(server.identities.get(AGENT_ID).unwrap().email_verified);

    // Already verified: nothing more to send
    let response = server
        .post_json("/api/v1/auth/email-verification/request", &json!({}), Some(&access))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_email_verification_requires_auth() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    let response = server
        .post_json("/api/v1/auth/email-verification/request", &json!({}), None)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

/// A token for an old address does not verify the new one.
#[tokio::test]
async fn test_email_verification_stale_address_rejected() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    let access = server.agent_access_token().await?;
    server
        .post_json("/api/v1/auth/email-verification/request", &json!({}), Some(&access))
        .await?;
    let delivered = server.delivery.last(Purpose::EmailVerification).unwrap();

    server.identities.set_email(AGENT_ID, "agent42-new@example.com");

    let response = server
        .post_json(
            "/api/v1/auth/email-verification/confirm",
            &json!({ "token": delivered.token }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!server.identities.get(AGENT_ID).unwrap().email_verified);

    Ok(())
}

#[tokio::test]
async fn test_phone_verification_flow_and_replay() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    let access = server.agent_access_token().await?;

    let response = server
        .post_json("/api/v1/auth/phone-verification/request", &json!({}), Some(&access))
        .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let delivered = server.delivery.last(Purpose::PhoneVerification).unwrap();
    assert_eq!(delivered.channel, DeliveryChannel::Sms);
    assert_eq!(delivered.destination, AGENT_PHONE);

    let body = json!({ "token": delivered.token });
    let response = server
        .post_json("/api/v1/auth/phone-verification/confirm", &body, None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(server.identities.get(AGENT_ID).unwrap().phone_verified);

    let replay = server
        .post_json("/api/v1/auth/phone-verification/confirm", &body, None)
        .await?;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(replay).await, "TOKEN_REPLAYED");

    Ok(())
}

// ============================================================================
// Magic links
// ============================================================================

#[tokio::test]
async fn test_magic_link_creates_session_once() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;

    let response = server
        .post_json(
            "/api/v1/auth/magic-link/request",
            &json!({ "identifier": AGENT_EMAIL }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let delivered = server.delivery.last(Purpose::MagicLink).unwrap();

    let body = json!({ "token": delivered.token, "device": "mobile" });
    let response = server
        .post_json("/api/v1/auth/magic-link/consume", &body, None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let tokens: Value = response.json().await?;
    assert_eq!(tokens["identity_id"], 42);

    let me = server
        .get("/api/v1/auth/me", tokens["access_token"].as_str())
        .await?;
    assert_eq!(me.status(), StatusCode::OK);
    let me: Value = me.json().await?;
    assert_eq!(me["device"], "mobile");

    let replay = server
        .post_json("/api/v1/auth/magic-link/consume", &body, None)
        .await?;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(replay).await, "TOKEN_REPLAYED");

    Ok(())
}

#[tokio::test]
async fn test_magic_link_for_suspended_identity_not_sent() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    server
        .auth()
        .set_standing(AGENT_ID, auth_service::repositories::Standing::Suspended)
        .await?;

    let response = server
        .post_json(
            "/api/v1/auth/magic-link/request",
            &json!({ "identifier": AGENT_EMAIL }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(server.delivery.last(Purpose::MagicLink).is_none());

    Ok(())
}

/// A link issued before a suspension cannot be used after it.
#[tokio::test]
async fn test_magic_link_consumed_after_suspension_refused() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    server.auth().request_magic_link(AGENT_PHONE).await?;
    let delivered = server.delivery.last(Purpose::MagicLink).unwrap();
    assert_eq!(delivered.channel, DeliveryChannel::Sms);

    server
        .auth()
        .set_standing(AGENT_ID, auth_service::repositories::Standing::Deactivated)
        .await?;

    let response = server
        .post_json(
            "/api/v1/auth/magic-link/consume",
            &json!({ "token": delivered.token }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(response).await, "ACCOUNT_SUSPENDED");

    Ok(())
}
