//! Notification Hub over real WebSockets.
//!
//! Clients connect to `/ws?token=<access token>`, receive a welcome frame,
//! and then whatever business services push to their identity.

use auth_service::context::authenticate_access_token;
use auth_service::hub::{HubError, Notification, Registration};
use auth_test_utils::*;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn connect(server: &TestAuthServer, token: &str) -> Socket {
    let (socket, _) = connect_async(server.ws_url(token)).await.unwrap();
    socket
}

/// Connect and consume the welcome frame.
async fn connect_welcomed(server: &TestAuthServer, token: &str) -> (Socket, Value) {
    let mut socket = connect(server, token).await;
    let welcome = next_json(&mut socket).await;
    assert_eq!(welcome["type"], "welcome");
    (socket, welcome)
}

/// Next text frame as JSON. Control frames are skipped.
async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(RECV_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket ended")
            .expect("socket error");
        match message {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => continue,
        }
    }
}

/// Read until the server closes; returns the close code if one was sent.
async fn close_code(socket: &mut Socket) -> Option<u16> {
    loop {
        let next = tokio::time::timeout(RECV_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for close");
        match next {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

async fn rejected_status(server: &TestAuthServer, token: &str) -> u16 {
    match connect_async(server.ws_url(token)).await {
        Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("upgrade should have been refused"),
    }
}

#[tokio::test]
async fn test_welcome_frame_identifies_connection() {
    let server = TestAuthServer::spawn().await.unwrap();
    let token = server.agent_access_token().await.unwrap();

    let (_socket, welcome) = connect_welcomed(&server, &token).await;

    assert_eq!(welcome["payload"]["identity_id"], 42);
    assert!(welcome["payload"]["connection_id"].is_string());
    assert!(welcome["sent_at"].is_string());
}

#[tokio::test]
async fn test_send_to_identity_reaches_every_connection() {
    let server = TestAuthServer::spawn().await.unwrap();
    let agent_web = server.agent_access_token().await.unwrap();
    let agent_mobile = server.agent_access_token().await.unwrap();
    let admin = server.admin_access_token().await.unwrap();

    let (mut first, _) = connect_welcomed(&server, &agent_web).await;
    let (mut second, _) = connect_welcomed(&server, &agent_mobile).await;
    let (mut admin_socket, _) = connect_welcomed(&server, &admin).await;

    server
        .hub()
        .send_to_identity(
            AGENT_ID,
            &Notification::new("bundle.purchased", json!({ "bundle_id": 9, "msisdn": "254700000042" })),
        )
        .await;
    server
        .hub()
        .broadcast_to_role("admin", &Notification::new("ops.marker", json!({})))
        .await;

    for socket in [&mut first, &mut second] {
        let frame = next_json(socket).await;
        assert_eq!(frame["type"], "bundle.purchased");
        assert_eq!(frame["payload"]["bundle_id"], 9);
        assert!(frame["sent_at"].is_string());
    }

    // The admin's first frame is the marker, so the agent message never
    // reached it
    let frame = next_json(&mut admin_socket).await;
    assert_eq!(frame["type"], "ops.marker");
}

#[tokio::test]
async fn test_messages_arrive_in_submission_order() {
    let server = TestAuthServer::spawn().await.unwrap();
    let token = server.agent_access_token().await.unwrap();
    let (mut socket, _) = connect_welcomed(&server, &token).await;

    for seq in 0..20 {
        server
            .hub()
            .send_to_identity(AGENT_ID, &Notification::new("balance.updated", json!({ "seq": seq })))
            .await;
    }

    for seq in 0..20 {
        let frame = next_json(&mut socket).await;
        assert_eq!(frame["payload"]["seq"], seq);
    }
}

#[tokio::test]
async fn test_broadcast_reaches_everyone() {
    let server = TestAuthServer::spawn().await.unwrap();
    let agent = server.agent_access_token().await.unwrap();
    let admin = server.admin_access_token().await.unwrap();
    let (mut agent_socket, _) = connect_welcomed(&server, &agent).await;
    let (mut admin_socket, _) = connect_welcomed(&server, &admin).await;

    server
        .hub()
        .broadcast(&Notification::new("maintenance.scheduled", json!({ "at": "02:00" })))
        .await;

    assert_eq!(next_json(&mut agent_socket).await["type"], "maintenance.scheduled");
    assert_eq!(next_json(&mut admin_socket).await["type"], "maintenance.scheduled");
}

#[tokio::test]
async fn test_client_ping_gets_pong() {
    let server = TestAuthServer::spawn().await.unwrap();
    let token = server.agent_access_token().await.unwrap();
    let (mut socket, _) = connect_welcomed(&server, &token).await;

    socket
        .send(Message::Text(r#"{"type":"ping"}"#.to_string()))
        .await
        .unwrap();

    let frame = next_json(&mut socket).await;
    assert_eq!(frame["type"], "pong");
}

#[tokio::test]
async fn test_upgrade_refused_without_valid_token() {
    let server = TestAuthServer::spawn().await.unwrap();

    assert_eq!(rejected_status(&server, "not-a-jwt").await, 401);

    let refresh = server.login(AGENT_EMAIL, AGENT_PASSWORD).await.unwrap()["refresh_token"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(rejected_status(&server, &refresh).await, 401);

    let forged = TestTokenBuilder::access_for(AGENT_ID).sign_with_seed(99, TEST_KID);
    assert_eq!(rejected_status(&server, &forged).await, 401);

    let stats = server.hub().stats().await.unwrap();
    assert_eq!(stats.connections, 0);
}

#[tokio::test]
async fn test_logout_closes_only_that_sessions_sockets() {
    let server = TestAuthServer::spawn().await.unwrap();
    let leaving = server.agent_access_token().await.unwrap();
    let staying = server.agent_access_token().await.unwrap();

    let (mut leaving_socket, _) = connect_welcomed(&server, &leaving).await;
    let (mut staying_socket, _) = connect_welcomed(&server, &staying).await;

    let response = server
        .post_json("/api/v1/auth/logout", &json!({}), Some(&leaving))
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    assert_eq!(close_code(&mut leaving_socket).await, Some(1008));

    server
        .hub()
        .send_to_identity(AGENT_ID, &Notification::new("still.here", json!({})))
        .await;
    assert_eq!(next_json(&mut staying_socket).await["type"], "still.here");

    let stats = server.hub().stats().await.unwrap();
    assert_eq!(stats.per_identity.get(&AGENT_ID), Some(&1));

    // The revoked session cannot reconnect
    assert_eq!(rejected_status(&server, &leaving).await, 401);
}

#[tokio::test]
async fn test_client_close_unregisters() {
    let server = TestAuthServer::spawn().await.unwrap();
    let token = server.agent_access_token().await.unwrap();
    let (mut socket, _) = connect_welcomed(&server, &token).await;

    assert_eq!(server.hub().stats().await.unwrap().connections, 1);

    socket.close(None).await.unwrap();

    let mut connections = 1;
    for _ in 0..50 {
        connections = server.hub().stats().await.unwrap().connections;
        if connections == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(connections, 0);

    // Sending to an identity with no connections is a no-op
    server
        .hub()
        .send_to_identity(AGENT_ID, &Notification::new("nobody.home", json!({})))
        .await;
}

#[tokio::test]
async fn test_hub_shutdown_closes_sockets_and_refuses_new_ones() {
    let server = TestAuthServer::spawn().await.unwrap();
    let token = server.agent_access_token().await.unwrap();
    let (mut socket, _) = connect_welcomed(&server, &token).await;

    server.hub().shutdown().await;

    assert_eq!(close_code(&mut socket).await, Some(1001));
    assert_eq!(rejected_status(&server, &token).await, 503);
}

#[tokio::test]
async fn test_session_revoked_before_registration_is_refused() {
    let server = TestAuthServer::spawn().await.unwrap();
    let token = server.agent_access_token().await.unwrap();

    // Authenticated as the upgrade handler would, then logged out before the
    // socket gets to register
    let context = authenticate_access_token(
        server.auth().verifier(),
        server.sessions.as_ref(),
        &token,
    )
    .await
    .unwrap();
    server.auth().logout(&context).await.unwrap();

    let (registration, mut receiver) = Registration::new(&context, 8);
    let result = server
        .hub()
        .register_for_session(registration, server.sessions.as_ref())
        .await;
    assert_eq!(result, Err(HubError::SessionNotLive));

    server
        .hub()
        .send_to_identity(AGENT_ID, &Notification::new("after.logout", json!({})))
        .await;

    assert!(receiver.outbound.try_recv().is_err());
    let stats = server.hub().stats().await.unwrap();
    assert_eq!(stats.connections, 0);
    assert_eq!(stats.per_identity.get(&AGENT_ID), None);
}

#[tokio::test]
async fn test_live_session_registers_for_delivery() {
    let server = TestAuthServer::spawn().await.unwrap();
    let token = server.agent_access_token().await.unwrap();
    let context = authenticate_access_token(
        server.auth().verifier(),
        server.sessions.as_ref(),
        &token,
    )
    .await
    .unwrap();

    let (registration, mut receiver) = Registration::new(&context, 8);
    server
        .hub()
        .register_for_session(registration, server.sessions.as_ref())
        .await
        .unwrap();

    server
        .hub()
        .send_to_identity(AGENT_ID, &Notification::new("bundle.purchased", json!({})))
        .await;
    let frame = tokio::time::timeout(RECV_TIMEOUT, receiver.outbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(frame.contains("bundle.purchased"));

    // A logout after registration reaches the connection through the hub
    server.auth().logout(&context).await.unwrap();
    tokio::time::timeout(RECV_TIMEOUT, receiver.closer.cancelled())
        .await
        .unwrap();
}
