//! Redis-backed stores against a live server.
//!
//! Run with `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`.
//! Every test works on fresh identity ids and keys, so a shared instance is
//! fine.

use auth_service::errors::AuthError;
use auth_service::rate_limit::{RateLimitPolicy, RateLimiter};
use auth_service::sessions::{NewSession, SessionStore};
use auth_service::store::{self, RedisRateLimiter, RedisReplayGuard, RedisSessionStore};
use auth_service::tokens::ReplayGuard;
use chrono::Utc;
use common::secret::SecretString;
use common::types::IdentityId;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use uuid::Uuid;

async fn redis() -> MultiplexedConnection {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    store::connect(&SecretString::from(url))
        .await
        .expect("Redis must be reachable at REDIS_URL")
}

fn fresh_identity() -> IdentityId {
    IdentityId(i64::try_from(Uuid::new_v4().as_u64_pair().0 >> 1).unwrap())
}

fn new_session(identity_id: IdentityId, tag: &str) -> NewSession {
    NewSession {
        identity_id,
        session_token: format!("access-{tag}-{}", Uuid::new_v4()),
        refresh_token: Some(format!("refresh-{tag}-{}", Uuid::new_v4())),
        ip_address: Some("10.0.0.7".to_string()),
        user_agent: Some("okhttp/4.12".to_string()),
        device_id: Some(tag.to_string()),
        ttl: chrono::Duration::minutes(10),
    }
}

#[tokio::test]
#[ignore = "requires Redis at REDIS_URL"]
async fn test_session_lookup_and_rotation() {
    let sessions = RedisSessionStore::new(redis().await);
    let identity = fresh_identity();

    let request = new_session(identity, "android");
    let access = request.session_token.clone();
    let refresh = request.refresh_token.clone().unwrap();
    let created = sessions.create(request).await.unwrap();

    assert_eq!(sessions.find_by_token(&access).await.unwrap().id, created.id);
    assert_eq!(sessions.find_by_refresh_token(&refresh).await.unwrap().id, created.id);
    let loaded = sessions.find_by_id(created.id).await.unwrap();
    assert_eq!(loaded.identity_id, identity);
    assert_eq!(loaded.device_id.as_deref(), Some("android"));

    let rotated = sessions
        .rotate(created.id, &refresh, "access-rotated", "refresh-rotated")
        .await
        .unwrap();
    assert_eq!(rotated.id, created.id);
    assert!(matches!(
        sessions.find_by_token(&access).await,
        Err(AuthError::SessionNotFound)
    ));
    assert_eq!(sessions.find_by_token("access-rotated").await.unwrap().id, created.id);

    // The old refresh token was rotated away
    assert!(matches!(
        sessions.rotate(created.id, &refresh, "a", "b").await,
        Err(AuthError::SessionNotFound)
    ));

    sessions.touch(created.id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis at REDIS_URL"]
async fn test_revoke_and_revoke_all() {
    let sessions = RedisSessionStore::new(redis().await);
    let identity = fresh_identity();

    let first = sessions.create(new_session(identity, "web")).await.unwrap();
    let second = sessions.create(new_session(identity, "mobile")).await.unwrap();
    let third = sessions.create(new_session(identity, "tablet")).await.unwrap();
    assert_eq!(sessions.list_active(identity).await.unwrap().len(), 3);

    sessions.revoke(first.id).await.unwrap();
    assert!(matches!(
        sessions.find_by_id(first.id).await,
        Err(AuthError::SessionNotFound)
    ));
    assert!(matches!(
        sessions.revoke(first.id).await,
        Err(AuthError::SessionNotFound)
    ));

    assert_eq!(sessions.revoke_all(identity).await.unwrap(), 2);
    assert!(sessions.list_active(identity).await.unwrap().is_empty());
    for id in [second.id, third.id] {
        assert!(sessions.find_by_id(id).await.is_err());
    }
    assert_eq!(sessions.revoke_all(identity).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis at REDIS_URL"]
async fn test_create_racing_revoke_all_leaves_nothing_unaccounted() {
    let sessions = std::sync::Arc::new(RedisSessionStore::new(redis().await));
    let identity = fresh_identity();

    let creates: Vec<_> = (0..20)
        .map(|n| {
            let sessions = sessions.clone();
            tokio::spawn(async move { sessions.create(new_session(identity, &format!("d{n}"))).await })
        })
        .collect();
    let revoke = {
        let sessions = sessions.clone();
        tokio::spawn(async move { sessions.revoke_all(identity).await })
    };

    let revoked = revoke.await.unwrap().unwrap();
    let mut created = Vec::new();
    for handle in creates {
        created.push(handle.await.unwrap().unwrap());
    }

    // Every session was either revoked by the sweep or is still listed
    let live = sessions.list_active(identity).await.unwrap();
    assert_eq!(revoked + u64::try_from(live.len()).unwrap(), 20);
    for session in &created {
        let listed = live.iter().any(|s| s.id == session.id);
        assert_eq!(sessions.find_by_id(session.id).await.is_ok(), listed);
    }
}

#[tokio::test]
#[ignore = "requires Redis at REDIS_URL"]
async fn test_rate_limiter_locks_at_threshold_and_resets() {
    let limiter = RedisRateLimiter::new(
        redis().await,
        RateLimitPolicy {
            threshold: 3,
            window: Duration::from_secs(60),
        },
    );
    let key = format!("test-{}", Uuid::new_v4());

    assert!(!limiter.check_and_record_failure(&key).await.unwrap().locked);
    assert!(!limiter.check_and_record_failure(&key).await.unwrap().locked);
    let third = limiter.check_and_record_failure(&key).await.unwrap();
    assert!(third.locked);
    assert_eq!(third.failed_count, 3);
    assert!(third.locked_until.unwrap() > Utc::now());

    // Failures while locked do not move the counter or the lock
    let while_locked = limiter.check_and_record_failure(&key).await.unwrap();
    assert!(while_locked.locked);
    assert_eq!(while_locked.failed_count, 3);
    assert_eq!(while_locked.locked_until, third.locked_until);

    let status = limiter.status(&key).await.unwrap();
    assert!(status.locked);
    assert_eq!(status.failed_count, 3);

    limiter.reset(&key).await.unwrap();
    let status = limiter.status(&key).await.unwrap();
    assert!(!status.locked);
    assert_eq!(status.failed_count, 0);
}

#[tokio::test]
#[ignore = "requires Redis at REDIS_URL"]
async fn test_replay_marker_rejects_second_use_and_covers_leeway() {
    let mut conn = redis().await;
    let guard = RedisReplayGuard::new(conn.clone(), Duration::from_secs(300));
    let jti = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + chrono::Duration::seconds(60);

    guard.consume(&jti, expires_at).await.unwrap();
    assert!(matches!(
        guard.consume(&jti, expires_at).await,
        Err(AuthError::TokenReplayed)
    ));

    let ttl_ms: i64 = redis::cmd("PTTL")
        .arg(format!("replay:jti:{jti}"))
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(ttl_ms > 300_000, "marker must outlive exp plus leeway, got {ttl_ms}");
}
