//! Deterministic cryptographic fixtures for testing
//!
//! The same seed always yields the same Ed25519 keypair, so tokens signed in
//! one part of a test can be checked against a key store built elsewhere.

use auth_service::crypto::KeyStore;
use auth_service::tokens::{TokenIssuer, TokenLifetimes, TokenVerifier};
use common::jwt::{encode_ed25519_public_key_pem, encode_pkcs8_private_key_pem};
use common::secret::SecretBox;
use ring::signature::{Ed25519KeyPair, KeyPair};
use thiserror::Error;

/// Key id used by the default test key store.
pub const TEST_KID: &str = "test-key-1";

/// Seed of the default test signing key.
pub const TEST_SEED: u8 = 1;

pub const TEST_ISSUER: &str = "bundlehub-auth-test";
pub const TEST_AUDIENCE: &str = "bundlehub-api-test";

/// Leeway used by test verifiers. Zero keeps expiry tests exact.
pub const TEST_LEEWAY_SECONDS: u64 = 0;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// A deterministic keypair in the PEM forms the key store loads.
pub struct TestKeyPair {
    pub private_pem: SecretBox<String>,
    pub public_pem: String,
    /// Raw PKCS#8 DER, for signing tokens directly with `jsonwebtoken`.
    pub pkcs8: Vec<u8>,
}

/// Generate a deterministic Ed25519 keypair for testing.
pub fn test_keypair(seed: u8) -> Result<TestKeyPair, FixtureError> {
    let mut seed_bytes = [0u8; 32];
    for (i, byte) in seed_bytes.iter_mut().enumerate() {
        *byte = seed.wrapping_mul(i as u8 + 1).wrapping_add(i as u8);
    }

    let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
        .map_err(|e| FixtureError::Crypto(format!("Failed to generate test keypair: {e:?}")))?;

    let pkcs8 = build_pkcs8_from_seed(&seed_bytes);

    Ok(TestKeyPair {
        private_pem: SecretBox::new(Box::new(encode_pkcs8_private_key_pem(&pkcs8))),
        public_pem: encode_ed25519_public_key_pem(key_pair.public_key().as_ref()),
        pkcs8,
    })
}

/// PKCS#8 v1 document wrapping a raw Ed25519 seed (RFC 8410).
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // version 0
        0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, // AlgorithmIdentifier: Ed25519
        0x04, 0x22, 0x04, 0x20, // OCTET STRING { OCTET STRING (32) }
    ];
    pkcs8.extend_from_slice(seed);
    pkcs8
}

/// Key store whose active key is `seed`, with optional retired keys given as
/// (kid, seed) pairs.
pub fn test_key_store(seed: u8, kid: &str, retired: &[(&str, u8)]) -> KeyStore {
    let active = test_keypair(seed).expect("test keypair");
    let retired: Vec<(String, String)> = retired
        .iter()
        .map(|(kid, seed)| {
            let pair = test_keypair(*seed).expect("retired test keypair");
            ((*kid).to_string(), pair.public_pem)
        })
        .collect();

    KeyStore::from_pem(kid, &active.private_pem, &active.public_pem, &retired)
        .expect("test key store")
}

/// Issuer and verifier sharing the default test key.
pub fn test_issuer_and_verifier(lifetimes: TokenLifetimes) -> (TokenIssuer, TokenVerifier) {
    let (signing, verification) = test_key_store(TEST_SEED, TEST_KID, &[]).into_parts();
    (
        TokenIssuer::new(signing, TEST_ISSUER, TEST_AUDIENCE, lifetimes),
        TokenVerifier::new(verification, TEST_ISSUER, TEST_AUDIENCE, TEST_LEEWAY_SECONDS),
    )
}
