//! Request middleware.

pub mod auth;

pub use auth::{enforce, optional_auth, require_auth, AccessRule, AuthLayerState, OptionalAuth};
