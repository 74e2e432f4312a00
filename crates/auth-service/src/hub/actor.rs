//! The hub's dispatch loop and its handle.

use super::messages::{HubMessage, Registration};
use super::{Envelope, HubConfig, HubError, HubStats, Notification};
use crate::observability::metrics::{
    record_hub_delivery, record_hub_eviction, set_hub_connections, set_hub_identities,
};
use crate::sessions::SessionStore;
use common::types::{ConnectionId, IdentityId, SessionId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to the notification hub.
///
/// Cheap to clone. Business services use it to push messages; the WebSocket
/// handler uses it to register and unregister connections.
#[derive(Clone)]
pub struct NotificationHubHandle {
    sender: mpsc::Sender<HubMessage>,
    cancel_token: CancellationToken,
    stopped: CancellationToken,
    config: HubConfig,
}

impl NotificationHubHandle {
    /// Spawn the dispatch loop and return a handle to it.
    #[must_use]
    pub fn spawn(config: HubConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.mailbox_capacity.max(1));
        let cancel_token = CancellationToken::new();
        let stopped = CancellationToken::new();

        let hub = NotificationHub {
            receiver,
            cancel_token: cancel_token.clone(),
            stopped: stopped.clone(),
            connections: HashMap::new(),
            by_identity: HashMap::new(),
        };
        tokio::spawn(hub.run());

        Self {
            sender,
            cancel_token,
            stopped,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> HubConfig {
        self.config
    }

    /// Add a connection to its identity's set.
    ///
    /// Returns once the dispatch loop has applied the registration, so every
    /// message submitted afterwards can reach the connection.
    ///
    /// # Errors
    ///
    /// `HubError::ShuttingDown` once shutdown has begun.
    pub async fn register(&self, registration: Registration) -> Result<(), HubError> {
        if self.cancel_token.is_cancelled() {
            return Err(HubError::ShuttingDown);
        }

        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubMessage::Register {
                registration,
                respond_to: tx,
            })
            .await
            .map_err(|_| HubError::ShuttingDown)?;

        rx.await.map_err(|_| HubError::ShuttingDown)?
    }

    /// Register, then confirm the connection's session is still live.
    ///
    /// A revocation that lands between authentication and registration finds
    /// nothing to disconnect, so the session is checked again once the
    /// registration is applied. If it is gone (or the store cannot say) the
    /// connection is removed again. Any revocation after this check reaches
    /// the registered connection through `disconnect_session`.
    ///
    /// # Errors
    ///
    /// `ShuttingDown`, or `SessionNotLive` when the session was revoked in
    /// the meantime.
    pub async fn register_for_session(
        &self,
        registration: Registration,
        sessions: &dyn SessionStore,
    ) -> Result<(), HubError> {
        let connection_id = registration.connection_id;
        let session_id = registration.session_id;
        let identity_id = registration.identity_id;
        self.register(registration).await?;

        match sessions.find_by_id(session_id).await {
            Ok(session) if session.identity_id == identity_id => Ok(()),
            Ok(_) | Err(_) => {
                debug!(
                    target: "auth.hub",
                    connection_id = %connection_id,
                    session_id = %session_id,
                    "Session ended before registration completed"
                );
                self.unregister(connection_id).await;
                Err(HubError::SessionNotLive)
            }
        }
    }

    /// Remove a connection. Unknown ids are ignored.
    pub async fn unregister(&self, connection_id: ConnectionId) {
        self.submit(HubMessage::Unregister { connection_id }).await;
    }

    /// Deliver to every live connection of `identity_id`. A no-op when the
    /// identity has none.
    pub async fn send_to_identity(&self, identity_id: IdentityId, notification: &Notification) {
        if let Some(message) = encode(notification) {
            self.submit(HubMessage::SendToIdentity {
                identity_id,
                message,
            })
            .await;
        }
    }

    /// Deliver to every live connection.
    pub async fn broadcast(&self, notification: &Notification) {
        if let Some(message) = encode(notification) {
            self.submit(HubMessage::Broadcast { message }).await;
        }
    }

    /// Deliver to connections whose identity held `role` at connect time.
    pub async fn broadcast_to_role(&self, role: &str, notification: &Notification) {
        if let Some(message) = encode(notification) {
            self.submit(HubMessage::BroadcastToRole {
                role: role.to_string(),
                message,
            })
            .await;
        }
    }

    /// Close every connection of an identity. Returns how many were closed.
    pub async fn disconnect_identity(&self, identity_id: IdentityId) -> usize {
        let (tx, rx) = oneshot::channel();
        self.submit(HubMessage::DisconnectIdentity {
            identity_id,
            respond_to: tx,
        })
        .await;
        rx.await.unwrap_or(0)
    }

    /// Close every connection opened under a session. Returns how many were
    /// closed.
    pub async fn disconnect_session(&self, session_id: SessionId) -> usize {
        let (tx, rx) = oneshot::channel();
        self.submit(HubMessage::DisconnectSession {
            session_id,
            respond_to: tx,
        })
        .await;
        rx.await.unwrap_or(0)
    }

    /// # Errors
    ///
    /// `HubError::ShuttingDown` if the dispatch loop has stopped.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubMessage::Stats { respond_to: tx })
            .await
            .map_err(|_| HubError::ShuttingDown)?;
        rx.await.map_err(|_| HubError::ShuttingDown)
    }

    /// Close every connection and stop the dispatch loop. Waits until the
    /// loop has exited.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        self.stopped.cancelled().await;
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn submit(&self, message: HubMessage) {
        if self.sender.send(message).await.is_err() {
            debug!(target: "auth.hub", "Hub stopped, message dropped");
        }
    }
}

fn encode(notification: &Notification) -> Option<Arc<str>> {
    Envelope::encode(&notification.kind, &notification.payload).map(Arc::from)
}

struct Connection {
    identity_id: IdentityId,
    session_id: SessionId,
    roles: Vec<String>,
    outbound: mpsc::Sender<Arc<str>>,
    closer: CancellationToken,
}

/// The dispatch loop. Sole owner of the connection registry.
struct NotificationHub {
    receiver: mpsc::Receiver<HubMessage>,
    cancel_token: CancellationToken,
    stopped: CancellationToken,
    connections: HashMap<ConnectionId, Connection>,
    by_identity: HashMap<IdentityId, HashSet<ConnectionId>>,
}

impl NotificationHub {
    async fn run(mut self) {
        info!(target: "auth.hub", "Notification hub started");

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(target: "auth.hub", "Notification hub received shutdown signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            info!(target: "auth.hub", "All hub handles dropped, exiting");
                            break;
                        }
                    }
                }
            }
        }

        self.close_all();
        self.stopped.cancel();
        info!(target: "auth.hub", "Notification hub stopped");
    }

    fn handle_message(&mut self, message: HubMessage) {
        match message {
            HubMessage::Register {
                registration,
                respond_to,
            } => {
                self.register(registration);
                let _ = respond_to.send(Ok(()));
            }
            HubMessage::Unregister { connection_id } => {
                if self.remove(connection_id).is_some() {
                    debug!(target: "auth.hub", connection_id = %connection_id, "Connection unregistered");
                    self.publish_gauges();
                }
            }
            HubMessage::SendToIdentity {
                identity_id,
                message,
            } => {
                let targets: Vec<ConnectionId> = self
                    .by_identity
                    .get(&identity_id)
                    .map(|ids| ids.iter().copied().collect())
                    .unwrap_or_default();
                let delivered = self.deliver(&targets, &message);
                record_hub_delivery("direct", delivered);
            }
            HubMessage::Broadcast { message } => {
                let targets: Vec<ConnectionId> = self.connections.keys().copied().collect();
                let delivered = self.deliver(&targets, &message);
                record_hub_delivery("broadcast", delivered);
            }
            HubMessage::BroadcastToRole { role, message } => {
                let targets: Vec<ConnectionId> = self
                    .connections
                    .iter()
                    .filter(|(_, conn)| conn.roles.iter().any(|r| *r == role))
                    .map(|(id, _)| *id)
                    .collect();
                let delivered = self.deliver(&targets, &message);
                record_hub_delivery("role", delivered);
            }
            HubMessage::DisconnectIdentity {
                identity_id,
                respond_to,
            } => {
                let targets: Vec<ConnectionId> = self
                    .by_identity
                    .get(&identity_id)
                    .map(|ids| ids.iter().copied().collect())
                    .unwrap_or_default();
                let closed = self.close(&targets);
                let _ = respond_to.send(closed);
            }
            HubMessage::DisconnectSession {
                session_id,
                respond_to,
            } => {
                let targets: Vec<ConnectionId> = self
                    .connections
                    .iter()
                    .filter(|(_, conn)| conn.session_id == session_id)
                    .map(|(id, _)| *id)
                    .collect();
                let closed = self.close(&targets);
                let _ = respond_to.send(closed);
            }
            HubMessage::Stats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
        }
    }

    fn register(&mut self, registration: Registration) {
        let Registration {
            connection_id,
            identity_id,
            session_id,
            roles,
            outbound,
            closer,
        } = registration;

        self.by_identity
            .entry(identity_id)
            .or_default()
            .insert(connection_id);
        self.connections.insert(
            connection_id,
            Connection {
                identity_id,
                session_id,
                roles,
                outbound,
                closer,
            },
        );

        debug!(
            target: "auth.hub",
            connection_id = %connection_id,
            session_id = %session_id,
            "Connection registered"
        );
        self.publish_gauges();
    }

    /// Queue `message` on each target without waiting. Connections whose queue
    /// is full or gone are dropped. Returns how many queues accepted it.
    fn deliver(&mut self, targets: &[ConnectionId], message: &Arc<str>) -> usize {
        let mut delivered = 0;
        let mut evicted = Vec::new();

        for id in targets {
            let Some(conn) = self.connections.get(id) else {
                continue;
            };
            match conn.outbound.try_send(Arc::clone(message)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => evicted.push((*id, "slow_consumer")),
                Err(mpsc::error::TrySendError::Closed(_)) => evicted.push((*id, "closed")),
            }
        }

        for (id, reason) in evicted {
            if let Some(conn) = self.remove(id) {
                conn.closer.cancel();
                record_hub_eviction(reason);
                warn!(
                    target: "auth.hub",
                    connection_id = %id,
                    reason,
                    "Connection dropped by hub"
                );
            }
        }
        if delivered < targets.len() {
            self.publish_gauges();
        }

        delivered
    }

    fn close(&mut self, targets: &[ConnectionId]) -> usize {
        let mut closed = 0;
        for id in targets {
            if let Some(conn) = self.remove(*id) {
                conn.closer.cancel();
                closed += 1;
            }
        }
        if closed > 0 {
            debug!(target: "auth.hub", closed, "Connections disconnected");
            self.publish_gauges();
        }
        closed
    }

    fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let conn = self.connections.remove(&id)?;
        if let Some(ids) = self.by_identity.get_mut(&conn.identity_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_identity.remove(&conn.identity_id);
            }
        }
        Some(conn)
    }

    /// Close every connection and refuse whatever is still queued.
    fn close_all(&mut self) {
        for (_, conn) in self.connections.drain() {
            conn.closer.cancel();
        }
        self.by_identity.clear();
        self.publish_gauges();

        self.receiver.close();
        while let Ok(message) = self.receiver.try_recv() {
            if let HubMessage::Register { respond_to, .. } = message {
                let _ = respond_to.send(Err(HubError::ShuttingDown));
            }
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            identities: self.by_identity.len(),
            connections: self.connections.len(),
            per_identity: self
                .by_identity
                .iter()
                .map(|(identity_id, ids)| (*identity_id, ids.len()))
                .collect(),
        }
    }

    fn publish_gauges(&self) {
        set_hub_connections(self.connections.len());
        set_hub_identities(self.by_identity.len());
    }
}
