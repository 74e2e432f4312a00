//! # Auth Test Utilities
//!
//! Shared test utilities for the auth service.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed Ed25519 keys for reproducible tests)
//! - Token builders, including hostile tokens the issuer would never mint
//! - In-memory implementations of the session, rate-limit, replay and
//!   identity boundaries
//! - A capturing `TokenDelivery` so tests can read out-of-band tokens
//! - Server test harness (`TestAuthServer` for E2E tests)
//! - Fixed test identities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = TestAuthServer::spawn().await?;
//!     let tokens = server.login(AGENT_EMAIL, AGENT_PASSWORD).await?;
//!
//!     let forged = TestTokenBuilder::access_for(AGENT_ID)
//!         .with_roles(&["admin"])
//!         .sign_with_seed(99, TEST_KID);
//! }
//! ```

pub mod crypto_fixtures;
pub mod memory;
pub mod server_harness;
pub mod test_ids;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use memory::*;
pub use server_harness::*;
pub use test_ids::*;
pub use token_builders::*;
