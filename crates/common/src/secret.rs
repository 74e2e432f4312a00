//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] wrappers used for every credential that flows
//! through the auth core: login passwords, signing key material, connection
//! URLs that embed passwords, and bearer tokens held in request state.
//!
//! `SecretString` and `SecretBox<T>` implement `Debug` with redaction, so any
//! struct deriving `Debug` stays safe to log. Values are zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct LoginAttempt {
//!     identifier: String,
//!     password: SecretString,
//! }
//!
//! let attempt = LoginAttempt {
//!     identifier: "agent@example.com".to_string(),
//!     password: SecretString::from("hunter2"),
//! };
//!
//! assert!(!format!("{attempt:?}").contains("hunter2"));
//! assert_eq!(attempt.password.expose_secret(), "hunter2");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
