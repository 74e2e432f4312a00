//! Messages into the hub's dispatch loop.
//!
//! Request-reply messages carry a `oneshot` response channel.

use super::{HubError, HubStats};
use crate::context::AuthContext;
use common::types::{ConnectionId, IdentityId, SessionId};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub(crate) enum HubMessage {
    Register {
        registration: Registration,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// Idempotent.
    Unregister { connection_id: ConnectionId },

    SendToIdentity {
        identity_id: IdentityId,
        message: Arc<str>,
    },

    Broadcast { message: Arc<str> },

    /// Deliver to connections whose identity held `role` when it connected.
    BroadcastToRole { role: String, message: Arc<str> },

    /// Close every connection of an identity; replies with how many.
    DisconnectIdentity {
        identity_id: IdentityId,
        respond_to: oneshot::Sender<usize>,
    },

    /// Close every connection opened under a session; replies with how many.
    DisconnectSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<usize>,
    },

    Stats {
        respond_to: oneshot::Sender<HubStats>,
    },
}

/// The hub's side of one connection.
#[derive(Debug)]
pub struct Registration {
    pub(crate) connection_id: ConnectionId,
    pub(crate) identity_id: IdentityId,
    pub(crate) session_id: SessionId,
    pub(crate) roles: Vec<String>,
    pub(crate) outbound: mpsc::Sender<Arc<str>>,
    pub(crate) closer: CancellationToken,
}

/// The transport's side of one connection: what the writer drains.
#[derive(Debug)]
pub struct ConnectionReceiver {
    pub connection_id: ConnectionId,
    pub outbound: mpsc::Receiver<Arc<str>>,
    /// Cancelled when the hub drops the connection (eviction, disconnect,
    /// shutdown).
    pub closer: CancellationToken,
}

impl Registration {
    /// Pair a registration with its receiving half. `buffer` bounds the
    /// outbound queue.
    #[must_use]
    pub fn new(context: &AuthContext, buffer: usize) -> (Self, ConnectionReceiver) {
        let connection_id = ConnectionId::new();
        let (outbound, receiver) = mpsc::channel(buffer.max(1));
        let closer = CancellationToken::new();

        (
            Self {
                connection_id,
                identity_id: context.identity_id,
                session_id: context.session_id,
                roles: context.roles.clone(),
                outbound,
                closer: closer.clone(),
            },
            ConnectionReceiver {
                connection_id,
                outbound: receiver,
                closer,
            },
        )
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }
}
