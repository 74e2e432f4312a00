//! Common utilities and types shared across Bundlehub components.

#![warn(clippy::pedantic)]

/// Module for strongly typed identifiers
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT wire-format helpers (size limits, header inspection, key decoding)
pub mod jwt;
