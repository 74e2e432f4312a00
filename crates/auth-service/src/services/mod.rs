//! Business flows that sit on top of the token, session and hub layers.

pub mod auth_service;
pub mod delivery;

pub use auth_service::{
    AuthBackends, AuthService, ClientInfo, LoginRequest, SessionTokens, StandingChange,
};
pub use delivery::{DeliveryChannel, LogOnlyDelivery, OutOfBandToken, TokenDelivery};
