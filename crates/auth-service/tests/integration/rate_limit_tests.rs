//! Failed-login lockout through the login endpoint.

use auth_service::rate_limit::{login_key, RateLimiter};
use auth_test_utils::*;
use reqwest::StatusCode;
use serde_json::{json, Value};

async fn attempt(server: &TestAuthServer, identifier: &str, password: &str) -> reqwest::Response {
    server
        .post_json(
            "/api/v1/auth/login",
            &json!({ "identifier": identifier, "password": password }),
            None,
        )
        .await
        .unwrap()
}

/// The fifth failure locks; the sixth attempt is refused even with the right
/// password.
#[tokio::test]
async fn test_fifth_failure_locks_even_correct_password() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;

    for _ in 0..4 {
        let response = attempt(&server, AGENT_EMAIL, "wrong-password").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let fifth = attempt(&server, AGENT_EMAIL, "wrong-password").await;
    assert_eq!(fifth.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: i64 = fifth
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()?
        .parse()?;
    assert!(retry_after > 0);
    let body: Value = fifth.json().await?;
    assert_eq!(body["error"]["code"], "ACCOUNT_LOCKED");

    let sixth = attempt(&server, AGENT_EMAIL, AGENT_PASSWORD).await;
    assert_eq!(sixth.status(), StatusCode::TOO_MANY_REQUESTS);

    let status = server.limiter.status(&login_key(AGENT_EMAIL)).await?;
    assert!(status.locked);
    assert!(status.locked_until.unwrap() > chrono::Utc::now());
    // Attempts while locked are not counted
    assert_eq!(status.failed_count, 5);

    Ok(())
}

#[tokio::test]
async fn test_lock_expires_after_window() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    for _ in 0..5 {
        attempt(&server, AGENT_EMAIL, "wrong-password").await;
    }
    assert_eq!(
        attempt(&server, AGENT_EMAIL, AGENT_PASSWORD).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    server.limiter.elapse_lock(&login_key(AGENT_EMAIL));
    assert_eq!(
        attempt(&server, AGENT_EMAIL, AGENT_PASSWORD).await.status(),
        StatusCode::OK
    );

    Ok(())
}

/// Success after failures resets the counter, so the next failure is #1.
#[tokio::test]
async fn test_success_resets_failure_count() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    let key = login_key(AGENT_EMAIL);

    for _ in 0..3 {
        attempt(&server, AGENT_EMAIL, "wrong-password").await;
    }
    assert_eq!(server.limiter.status(&key).await?.failed_count, 3);

    assert_eq!(
        attempt(&server, AGENT_EMAIL, AGENT_PASSWORD).await.status(),
        StatusCode::OK
    );
    assert_eq!(server.limiter.status(&key).await?.failed_count, 0);

    attempt(&server, AGENT_EMAIL, "wrong-password").await;
    assert_eq!(server.limiter.status(&key).await?.failed_count, 1);

    Ok(())
}

/// Unknown identifiers lock the same way, so a lock reveals nothing about
/// whether the account exists.
#[tokio::test]
async fn test_unknown_identifier_locks_like_known() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    for _ in 0..4 {
        assert_eq!(
            attempt(&server, UNKNOWN_EMAIL, "whatever-pass").await.status(),
            StatusCode::UNAUTHORIZED
        );
    }
    let fifth = attempt(&server, UNKNOWN_EMAIL, "whatever-pass").await;
    assert_eq!(fifth.status(), StatusCode::TOO_MANY_REQUESTS);

    Ok(())
}

/// Counters are per identifier (case-insensitive) and do not leak across
/// identities.
#[tokio::test]
async fn test_counter_is_per_identifier() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    for _ in 0..5 {
        attempt(&server, "AGENT42@example.com", "wrong-password").await;
    }

    assert_eq!(
        attempt(&server, AGENT_EMAIL, AGENT_PASSWORD).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        attempt(&server, ADMIN_EMAIL, ADMIN_PASSWORD).await.status(),
        StatusCode::OK
    );
    // Phone login is a different key
    assert_eq!(
        attempt(&server, AGENT_PHONE, AGENT_PASSWORD).await.status(),
        StatusCode::OK
    );

    Ok(())
}
