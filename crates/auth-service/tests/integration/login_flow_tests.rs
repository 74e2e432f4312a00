//! E2E tests for login, refresh and logout.
//!
//! ## Test Naming
//!
//! Tests follow the convention: `test_<feature>_<scenario>_<expected_result>`

use auth_service::sessions::SessionStatus;
use auth_test_utils::*;
use common::types::SessionId;
use reqwest::StatusCode;
use serde_json::{json, Value};

fn session_id(body: &Value) -> SessionId {
    body["session_id"].as_str().unwrap().parse().unwrap()
}

/// Identity 42 logs in, uses its access token, logs out, and the same token
/// is then refused even though its signature and expiry are still fine.
#[tokio::test]
async fn test_login_use_logout_revokes_token() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;

    // Login
    let body = server.login(AGENT_EMAIL, AGENT_PASSWORD).await?;
    assert_eq!(body["identity_id"], 42);
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["expires_in"].as_i64().unwrap() > 0);
    assert_eq!(body["roles"], json!(AGENT_ROLES));
    assert_eq!(body["permissions"], json!(AGENT_PERMISSIONS));

    let access = body["access_token"].as_str().unwrap().to_string();
    let sid = session_id(&body);
    let session = server.sessions.get(sid).unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.identity_id, AGENT_ID);

    // Authenticated request passes the middleware
    let me = server.get("/api/v1/auth/me", Some(&access)).await?;
    assert_eq!(me.status(), StatusCode::OK);
    let me: Value = me.json().await?;
    assert_eq!(me["identity_id"], 42);
    assert_eq!(me["session_id"], sid.to_string());

    // Logout
    let response = server
        .post_json("/api/v1/auth/logout", &json!({}), Some(&access))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let session = server.sessions.get(sid).unwrap();
    assert_eq!(session.status, SessionStatus::Revoked);
    assert!(session.logout_at.is_some());

    // Token still verifies cryptographically, but its session is gone
    assert!(server.auth().verifier().verify_access_token(&access).is_ok());
    let response = server.get("/api/v1/auth/me", Some(&access)).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "SESSION_NOT_FOUND");

    Ok(())
}

#[tokio::test]
async fn test_login_by_phone_and_mixed_case_email() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;

    let by_phone = server.login(AGENT_PHONE, AGENT_PASSWORD).await?;
    assert_eq!(by_phone["identity_id"], 42);

    let by_email = server.login("Agent42@Example.COM", AGENT_PASSWORD).await?;
    assert_eq!(by_email["identity_id"], 42);
    assert_ne!(by_phone["session_id"], by_email["session_id"]);

    Ok(())
}

#[tokio::test]
async fn test_login_wrong_password_and_unknown_identifier_look_alike() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;

    let wrong = server
        .post_json(
            "/api/v1/auth/login",
            &json!({ "identifier": AGENT_EMAIL, "password": "not-the-password" }),
            None,
        )
        .await?;
    let unknown = server
        .post_json(
            "/api/v1/auth/login",
            &json!({ "identifier": UNKNOWN_EMAIL, "password": "not-the-password" }),
            None,
        )
        .await?;

    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    let wrong: Value = wrong.json().await?;
    let unknown: Value = unknown.json().await?;
    assert_eq!(wrong, unknown);
    assert_eq!(wrong["error"]["code"], "INVALID_CREDENTIALS");

    Ok(())
}

#[tokio::test]
async fn test_login_records_client_metadata() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;

    let response = server
        .client()
        .post(format!("{}/api/v1/auth/login", server.url()))
        .header("User-Agent", "bundlehub-pos/3.0")
        .json(&json!({
            "identifier": AGENT_EMAIL,
            "password": AGENT_PASSWORD,
            "device": "pos",
            "device_id": "till-7"
        }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;

    let session = server.sessions.get(session_id(&body)).unwrap();
    assert_eq!(session.user_agent.as_deref(), Some("bundlehub-pos/3.0"));
    assert_eq!(session.device_id.as_deref(), Some("till-7"));
    assert_eq!(session.ip_address.as_deref(), Some("127.0.0.1"));

    let claims = server
        .auth()
        .verifier()
        .verify_access_token(body["access_token"].as_str().unwrap())?;
    assert_eq!(claims.device, "pos");
    assert!(server.identities.get(AGENT_ID).unwrap().last_login_at.is_some());

    Ok(())
}

#[tokio::test]
async fn test_refresh_rotates_both_tokens() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    let first = server.login(AGENT_EMAIL, AGENT_PASSWORD).await?;
    let old_access = first["access_token"].as_str().unwrap();
    let old_refresh = first["refresh_token"].as_str().unwrap();

    // Grants changed since login take effect on refresh
    server.identities.set_roles(AGENT_ID, &["agent", "supervisor"]);

    let response = server
        .post_json("/api/v1/auth/refresh", &json!({ "refresh_token": old_refresh }), None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let second: Value = response.json().await?;
    assert_eq!(second["session_id"], first["session_id"]);
    assert_eq!(second["roles"], json!(["agent", "supervisor"]));
    let new_access = second["access_token"].as_str().unwrap();
    assert_ne!(new_access, old_access);

    // The new access token works, the old pair does not
    let me = server.get("/api/v1/auth/me", Some(new_access)).await?;
    assert_eq!(me.status(), StatusCode::OK);
    let me = server.get("/api/v1/auth/me", Some(old_access)).await?;
    assert_eq!(me.status(), StatusCode::UNAUTHORIZED);

    let replayed = server
        .post_json("/api/v1/auth/refresh", &json!({ "refresh_token": old_refresh }), None)
        .await?;
    assert_eq!(replayed.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn test_refresh_rejects_access_token_and_revoked_session() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    let body = server.login(AGENT_EMAIL, AGENT_PASSWORD).await?;
    let access = body["access_token"].as_str().unwrap();
    let refresh = body["refresh_token"].as_str().unwrap();

    let response = server
        .post_json("/api/v1/auth/refresh", &json!({ "refresh_token": access }), None)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let error: Value = response.json().await?;
    assert_eq!(error["error"]["code"], "TOKEN_WRONG_PURPOSE");

    server
        .post_json("/api/v1/auth/logout", &json!({}), Some(access))
        .await?;
    let response = server
        .post_json("/api/v1/auth/refresh", &json!({ "refresh_token": refresh }), None)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let error: Value = response.json().await?;
    assert_eq!(error["error"]["code"], "SESSION_NOT_FOUND");

    Ok(())
}

#[tokio::test]
async fn test_logout_all_revokes_every_session() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    let phone = server.login(AGENT_PHONE, AGENT_PASSWORD).await?;
    let web = server.login(AGENT_EMAIL, AGENT_PASSWORD).await?;
    let admin = server.admin_access_token().await?;

    let response = server
        .post_json(
            "/api/v1/auth/logout-all",
            &json!({}),
            web["access_token"].as_str(),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["revoked_sessions"], 2);

    for tokens in [&phone, &web] {
        let me = server
            .get("/api/v1/auth/me", tokens["access_token"].as_str())
            .await?;
        assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
    }

    // Another identity's session is untouched
    let me = server.get("/api/v1/auth/me", Some(&admin)).await?;
    assert_eq!(me.status(), StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn test_expired_session_is_not_found() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    let body = server.login(AGENT_EMAIL, AGENT_PASSWORD).await?;
    server.sessions.expire(session_id(&body));

    let me = server
        .get("/api/v1/auth/me", body["access_token"].as_str())
        .await?;
    assert_eq!(me.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}
