//! Notification Hub: registry of live authenticated WebSocket connections.
//!
//! # Design
//!
//! One dispatch task owns the identity → connections map. Every mutation and
//! every delivery is a message on the hub's bounded mailbox, so operations are
//! totally ordered and the map needs no lock:
//!
//! - A registration acknowledged to its caller precedes any later delivery
//! - Two messages for one identity reach each of its connections in order
//! - A broadcast sees exactly the connections registered when it is processed
//!
//! Each connection has its own bounded outbound queue drained by a writer
//! task. The dispatch loop only ever `try_send`s into those queues; a full
//! queue gets the connection closed instead of stalling everyone else.
//! Delivery is at-most-once and producers are never told whether a message
//! reached a client.

mod actor;
mod messages;
pub mod socket;

pub use actor::NotificationHubHandle;
pub use messages::{ConnectionReceiver, Registration};

use chrono::{DateTime, Utc};
use common::types::IdentityId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Hub errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// Shutdown has begun; new registrations are refused.
    #[error("Notification hub is shutting down")]
    ShuttingDown,

    /// The connection's session was revoked or expired before registration
    /// completed.
    #[error("Session is no longer active")]
    SessionNotLive,
}

/// Sizing and liveness settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    pub mailbox_capacity: usize,
    pub connection_buffer: usize,
    pub ping_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1024,
            connection_buffer: 64,
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// Point-in-time registry counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub identities: usize,
    pub connections: usize,
    pub per_identity: BTreeMap<IdentityId, usize>,
}

/// A message produced by a business service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

impl Notification {
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Wire form of every server-pushed frame.
#[derive(Debug, Serialize)]
pub(crate) struct Envelope<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub payload: &'a serde_json::Value,
    pub sent_at: DateTime<Utc>,
}

impl Envelope<'_> {
    pub(crate) fn encode(kind: &str, payload: &serde_json::Value) -> Option<String> {
        let envelope = Envelope {
            kind,
            payload,
            sent_at: Utc::now(),
        };
        serde_json::to_string(&envelope)
            .inspect_err(|e| {
                tracing::error!(target: "auth.hub", error = %e, "Failed to encode hub message");
            })
            .ok()
    }
}
