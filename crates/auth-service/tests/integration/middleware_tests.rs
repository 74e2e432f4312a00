//! Access middleware driven in-process through the router.

use auth_test_utils::*;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use common::types::SessionId;
use http_body_util::BodyExt;
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

async fn send(
    server: &TestAuthServer,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
) -> (StatusCode, axum::http::HeaderMap, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = server
        .router()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

#[tokio::test]
async fn test_status_is_anonymous_without_token() {
    let server = TestAuthServer::spawn().await.unwrap();

    let (status, _, body) = send(&server, Method::GET, "/api/v1/auth/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authenticated"], false);
    assert!(body.get("identity_id").is_none());
}

#[tokio::test]
async fn test_status_with_token_reports_identity() {
    let server = TestAuthServer::spawn().await.unwrap();
    let token = server.agent_access_token().await.unwrap();

    let (status, _, body) =
        send(&server, Method::GET, "/api/v1/auth/status", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["identity_id"], 42);
    assert_eq!(body["roles"][0], "agent");
}

/// Optional routes never fail on a bad credential.
#[tokio::test]
async fn test_status_with_bad_token_is_anonymous() {
    let server = TestAuthServer::spawn().await.unwrap();
    let expired = TestTokenBuilder::access_for(AGENT_ID)
        .expires_in(-60)
        .sign_with_seed(TEST_SEED, TEST_KID);

    for token in ["garbage", expired.as_str()] {
        let (status, _, body) =
            send(&server, Method::GET, "/api/v1/auth/status", Some(token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["authenticated"], false);
    }
}

#[tokio::test]
async fn test_protected_route_requires_bearer() {
    let server = TestAuthServer::spawn().await.unwrap();

    let (status, headers, body) = send(&server, Method::GET, "/api/v1/auth/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(headers.contains_key(header::WWW_AUTHENTICATE));
    assert_eq!(body["error"]["code"], "TOKEN_MALFORMED");
}

#[tokio::test]
async fn test_me_returns_context() {
    let server = TestAuthServer::spawn().await.unwrap();
    let login = server.login(AGENT_EMAIL, AGENT_PASSWORD).await.unwrap();
    let token = login["access_token"].as_str().unwrap();

    let (status, _, body) = send(&server, Method::GET, "/api/v1/auth/me", Some(token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["identity_id"], 42);
    assert_eq!(body["session_id"], login["session_id"]);
    assert_eq!(body["permissions"], serde_json::json!(AGENT_PERMISSIONS));
}

#[tokio::test]
async fn test_agent_denied_on_admin_routes() {
    let server = TestAuthServer::spawn().await.unwrap();
    let token = server.agent_access_token().await.unwrap();

    let cases = [
        (Method::GET, "/api/v1/admin/identities/1/sessions"),
        (Method::POST, "/api/v1/admin/identities/1/suspend"),
        (Method::GET, "/api/v1/admin/hub/stats"),
    ];
    for (method, uri) in cases {
        let (status, _, body) = send(&server, method, uri, Some(&token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(body["error"]["code"], "PERMISSION_DENIED");
    }

    // Nothing happened to the admin
    assert_eq!(
        server.identities.get(ADMIN_ID).unwrap().standing,
        auth_service::repositories::Standing::Active
    );
}

#[tokio::test]
async fn test_admin_routes_require_authentication_first() {
    let server = TestAuthServer::spawn().await.unwrap();

    let (status, _, _) = send(&server, Method::GET, "/api/v1/admin/hub/stats", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_allowed_on_admin_routes() {
    let server = TestAuthServer::spawn().await.unwrap();
    let token = server.admin_access_token().await.unwrap();

    let (status, _, body) = send(
        &server,
        Method::GET,
        "/api/v1/admin/identities/42/sessions",
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["identity_id"], 42);

    let (status, _, _) = send(&server, Method::GET, "/api/v1/admin/hub/stats", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_authenticated_request_touches_session() {
    let server = TestAuthServer::spawn().await.unwrap();
    let login = server.login(AGENT_EMAIL, AGENT_PASSWORD).await.unwrap();
    let session_id: SessionId = login["session_id"].as_str().unwrap().parse().unwrap();
    let before = server.sessions.get(session_id).unwrap().last_activity_at;

    tokio::time::sleep(Duration::from_millis(10)).await;
    let (status, _, _) = send(
        &server,
        Method::GET,
        "/api/v1/auth/me",
        login["access_token"].as_str(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let after = server.sessions.get(session_id).unwrap().last_activity_at;
    assert!(after > before);
}

#[tokio::test]
async fn test_activity_tracking_can_be_disabled() {
    let server = TestAuthServer::spawn_with(TestServerOptions {
        track_session_activity: false,
        ..TestServerOptions::default()
    })
    .await
    .unwrap();
    let login = server.login(AGENT_EMAIL, AGENT_PASSWORD).await.unwrap();
    let session_id: SessionId = login["session_id"].as_str().unwrap().parse().unwrap();
    let before = server.sessions.get(session_id).unwrap().last_activity_at;

    tokio::time::sleep(Duration::from_millis(10)).await;
    send(
        &server,
        Method::GET,
        "/api/v1/auth/me",
        login["access_token"].as_str(),
    )
    .await;

    assert_eq!(server.sessions.get(session_id).unwrap().last_activity_at, before);
}

#[tokio::test]
async fn test_metrics_endpoint_served() {
    let server = TestAuthServer::spawn().await.unwrap();

    let response = server
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
