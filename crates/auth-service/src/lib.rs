//! Bundlehub auth core.
//!
//! Identity and session security for the reseller platform plus the
//! real-time Notification Hub.
//!
//! # Modules
//!
//! - `config` - Service configuration
//! - `crypto` - Key store and password hashing
//! - `tokens` - Purpose-scoped token issuing and verification
//! - `sessions` / `store` - Session records and their Redis backing
//! - `rate_limit` - Failed-login lockout
//! - `repositories` - Identity store (PostgreSQL)
//! - `services` - Auth orchestrator and out-of-band delivery
//! - `hub` - Live WebSocket connection registry
//! - `middleware`, `handlers`, `routes` - HTTP surface

pub mod config;
pub mod context;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod hub;
pub mod middleware;
pub mod observability;
pub mod rate_limit;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod sessions;
pub mod store;
pub mod tokens;
