//! Out-of-band delivery of single-use tokens (email and SMS gateways live
//! outside this service).

use crate::errors::AuthError;
use crate::observability::hash_for_correlation;
use crate::tokens::Purpose;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::IdentityId;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryChannel {
    Email,
    Sms,
}

impl DeliveryChannel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DeliveryChannel::Email => "email",
            DeliveryChannel::Sms => "sms",
        }
    }
}

/// A token on its way to the identity's inbox or phone.
#[derive(Clone)]
pub struct OutOfBandToken {
    pub identity_id: IdentityId,
    pub purpose: Purpose,
    pub channel: DeliveryChannel,
    pub destination: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for OutOfBandToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutOfBandToken")
            .field("identity_id", &"[REDACTED]")
            .field("purpose", &self.purpose)
            .field("channel", &self.channel)
            .field("destination", &"[REDACTED]")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait TokenDelivery: Send + Sync {
    async fn deliver(&self, message: OutOfBandToken) -> Result<(), AuthError>;
}

/// Records that a delivery was requested. The token itself is never logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyDelivery;

#[async_trait]
impl TokenDelivery for LogOnlyDelivery {
    async fn deliver(&self, message: OutOfBandToken) -> Result<(), AuthError> {
        tracing::info!(
            target: "auth.delivery",
            purpose = %message.purpose,
            channel = message.channel.as_str(),
            destination_hash = %hash_for_correlation(&message.destination),
            expires_at = %message.expires_at,
            "Out-of-band token ready for delivery"
        );
        Ok(())
    }
}
