//! Per-connection read and write pumps.

use super::messages::{ConnectionReceiver, Registration};
use super::{Envelope, HubError, NotificationHubHandle};
use crate::context::AuthContext;
use crate::sessions::SessionStore;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Close code sent when the hub drops a connection (1008: policy violation).
const CLOSE_POLICY: u16 = 1008;
/// Close code sent on hub shutdown (1001: going away).
const CLOSE_GOING_AWAY: u16 = 1001;

/// Serve one authenticated, upgraded socket until either side ends it.
///
/// The connection is registered before the welcome frame is written, so the
/// client never sees a welcome without being reachable. A session revoked
/// after the upgrade was authorized is refused with 1008. On exit the
/// connection is always unregistered.
pub async fn serve_connection(
    socket: WebSocket,
    hub: NotificationHubHandle,
    sessions: Arc<dyn SessionStore>,
    context: AuthContext,
) {
    let config = hub.config();
    let (registration, receiver) = Registration::new(&context, config.connection_buffer);
    let connection_id = receiver.connection_id;

    let (mut sender, mut stream) = socket.split();

    if let Err(err) = hub
        .register_for_session(registration, sessions.as_ref())
        .await
    {
        let frame = match err {
            HubError::SessionNotLive => CloseFrame {
                code: CLOSE_POLICY,
                reason: "session revoked".into(),
            },
            HubError::ShuttingDown => CloseFrame {
                code: CLOSE_GOING_AWAY,
                reason: "server shutting down".into(),
            },
        };
        let _ = sender.send(Message::Close(Some(frame))).await;
        return;
    }

    info!(
        target: "auth.hub",
        connection_id = %connection_id,
        session_id = %context.session_id,
        "WebSocket connected"
    );

    let welcome = json!({
        "connection_id": connection_id,
        "identity_id": context.identity_id,
    });
    if let Some(text) = Envelope::encode("welcome", &welcome) {
        if sender.send(Message::Text(text)).await.is_err() {
            hub.unregister(connection_id).await;
            return;
        }
    }

    // Replies generated by the read pump go out through the writer
    let (reply_tx, reply_rx) = mpsc::channel::<String>(8);

    let mut send_task = tokio::spawn(write_pump(
        sender,
        receiver,
        reply_rx,
        hub.clone(),
        config.ping_interval,
    ));
    let mut recv_task = tokio::spawn(async move {
        read_pump(&mut stream, reply_tx, config.ping_interval * 2).await;
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    hub.unregister(connection_id).await;
    info!(target: "auth.hub", connection_id = %connection_id, "WebSocket disconnected");
}

async fn write_pump<S>(
    mut sender: S,
    mut receiver: ConnectionReceiver,
    mut replies: mpsc::Receiver<String>,
    hub: NotificationHubHandle,
    ping_interval: Duration,
) where
    S: futures::Sink<Message> + Unpin,
{
    let mut ping = tokio::time::interval(ping_interval);
    // The first tick completes immediately
    ping.tick().await;

    loop {
        let frame = tokio::select! {
            biased;

            () = receiver.closer.cancelled() => {
                let frame = if hub.is_shutting_down() {
                    CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: "server shutting down".into(),
                    }
                } else {
                    CloseFrame {
                        code: CLOSE_POLICY,
                        reason: "connection closed by server".into(),
                    }
                };
                let _ = sender.send(Message::Close(Some(frame))).await;
                break;
            }
            msg = receiver.outbound.recv() => match msg {
                Some(text) => Message::Text(text.to_string()),
                None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            Some(reply) = replies.recv() => Message::Text(reply),
            _ = ping.tick() => Message::Ping(Vec::new()),
        };

        if sender.send(frame).await.is_err() {
            debug!(target: "auth.hub", "WebSocket write failed");
            break;
        }
    }
}

async fn read_pump<S, E>(stream: &mut S, replies: mpsc::Sender<String>, stale_after: Duration)
where
    S: futures::Stream<Item = Result<Message, E>> + Unpin,
{
    loop {
        let next = match tokio::time::timeout(stale_after, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                debug!(target: "auth.hub", "WebSocket peer went quiet, closing");
                break;
            }
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                if is_ping(&text) {
                    if let Some(pong) = Envelope::encode("pong", &serde_json::Value::Null) {
                        let _ = replies.try_send(pong);
                    }
                }
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            // Pong, Ping and Binary frames only count as liveness
            Some(Ok(_)) => {}
        }
    }
}

fn is_ping(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "ping"))
        .unwrap_or(false)
}
