//! Purpose-scoped signed tokens.
//!
//! - [`Purpose`] - the closed set of token uses and their lifetime/temp rules
//! - [`Claims`] - the signed payload
//! - [`TokenIssuer`] - mints tokens with the private key
//! - [`TokenVerifier`] - checks signature, issuer, audience, time window and purpose
//! - [`ReplayGuard`] - single-use enforcement for temporary tokens

mod claims;
mod issuer;
mod purpose;
mod replay;
mod verifier;

pub use claims::{Claims, TokenSubject};
pub use issuer::{IssuedToken, TokenIssuer};
pub use purpose::{Purpose, TempRule, TokenLifetimes, TtlClass};
pub use replay::ReplayGuard;
pub use verifier::TokenVerifier;
