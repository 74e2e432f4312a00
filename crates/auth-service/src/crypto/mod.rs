//! Key material and password hashing.
//!
//! # KeyStore
//!
//! The key store loads one Ed25519 signing key (PKCS#8 PEM) and its public
//! key (SPKI PEM) at startup, plus any retired public keys still accepted for
//! verification during rotation. Loading fails fast: a missing file, a
//! non-Ed25519 key or a public key that does not match the private key are all
//! fatal, so the process never accepts authenticated traffic with broken keys.
//!
//! [`KeyStore::into_parts`] splits the store so the private half goes only to
//! the token issuer and the public half only to the verifier.

use crate::config::{Config, MAX_BCRYPT_COST, MIN_BCRYPT_COST};
use crate::errors::AuthError;
use common::jwt::{decode_ed25519_public_key_pem, decode_pem_body, encode_ed25519_public_key_pem};
use common::secret::{ExposeSecret, SecretBox};
use jsonwebtoken::{DecodingKey, EncodingKey};
use ring::{
    rand::SystemRandom,
    signature::{Ed25519KeyPair, KeyPair},
};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::instrument;

/// Errors raised while loading key material.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("Failed to read key file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid signing key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid public key '{kid}': {reason}")]
    InvalidPublicKey { kid: String, reason: String },

    #[error("Public key does not match the signing key")]
    KeyMismatch,

    #[error("Key generation failed: {0}")]
    Generation(String),
}

impl From<KeyStoreError> for AuthError {
    fn from(err: KeyStoreError) -> Self {
        AuthError::KeyStoreUnavailable(err.to_string())
    }
}

/// The private half: used only by the token issuer.
pub struct SigningKey {
    kid: String,
    encoding_key: EncodingKey,
}

impl SigningKey {
    /// Key id stamped into every token header.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("encoding_key", &"[REDACTED]")
            .finish()
    }
}

/// The public half: the active key plus retired keys, indexed by kid.
#[derive(Clone)]
pub struct VerificationKeys {
    active_kid: String,
    keys: HashMap<String, DecodingKey>,
}

impl VerificationKeys {
    /// Select the key for a token header's `kid`.
    ///
    /// Tokens without a `kid` are only ever checked against the active key.
    #[must_use]
    pub fn select(&self, kid: Option<&str>) -> Option<&DecodingKey> {
        self.keys.get(kid.unwrap_or(&self.active_kid))
    }

    #[must_use]
    pub fn active_kid(&self) -> &str {
        &self.active_kid
    }

    /// All known key ids, active first.
    #[must_use]
    pub fn kids(&self) -> Vec<&str> {
        let mut kids: Vec<&str> = self
            .keys
            .keys()
            .map(String::as_str)
            .filter(|k| *k != self.active_kid)
            .collect();
        kids.sort_unstable();
        kids.insert(0, &self.active_kid);
        kids
    }
}

impl fmt::Debug for VerificationKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKeys")
            .field("active_kid", &self.active_kid)
            .field("kids", &self.kids())
            .finish()
    }
}

/// Loaded signing and verification keys.
#[derive(Debug)]
pub struct KeyStore {
    signing: SigningKey,
    verification: VerificationKeys,
}

impl KeyStore {
    /// Load keys from the paths in configuration.
    ///
    /// # Errors
    ///
    /// Any unreadable, malformed or mismatched key is a `KeyStoreError`.
    #[instrument(skip_all)]
    pub fn load(config: &Config) -> Result<Self, KeyStoreError> {
        let private_pem = read_key_file(&config.signing_key_path)?;
        let public_pem = read_key_file(&config.public_key_path)?;

        let mut retired = Vec::with_capacity(config.retired_public_keys.len());
        for (kid, path) in &config.retired_public_keys {
            retired.push((kid.clone(), read_key_file(path)?.expose_secret().clone()));
        }

        let store = Self::from_pem(
            &config.active_key_id,
            &private_pem,
            public_pem.expose_secret(),
            &retired,
        )?;

        tracing::info!(
            target: "auth.crypto",
            active_kid = %config.active_key_id,
            retired_keys = config.retired_public_keys.len(),
            "Signing keys loaded"
        );

        Ok(store)
    }

    /// Build a key store from PEM documents.
    ///
    /// `retired` lists (kid, public key PEM) pairs accepted for verification
    /// only.
    ///
    /// # Errors
    ///
    /// See [`KeyStoreError`].
    pub fn from_pem(
        active_kid: &str,
        private_pem: &SecretBox<String>,
        public_pem: &str,
        retired: &[(String, String)],
    ) -> Result<Self, KeyStoreError> {
        let pkcs8 = SecretBox::new(Box::new(
            decode_pem_body(private_pem.expose_secret())
                .map_err(|e| KeyStoreError::InvalidPrivateKey(e.to_string()))?,
        ));

        // ring rejects anything that is not an Ed25519 PKCS#8 document
        let key_pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(pkcs8.expose_secret())
            .map_err(|e| KeyStoreError::InvalidPrivateKey(format!("not an Ed25519 key: {e}")))?;

        let public_raw =
            decode_ed25519_public_key_pem(public_pem).map_err(|e| KeyStoreError::InvalidPublicKey {
                kid: active_kid.to_string(),
                reason: e.to_string(),
            })?;

        if key_pair.public_key().as_ref() != public_raw.as_slice() {
            return Err(KeyStoreError::KeyMismatch);
        }

        let mut keys = HashMap::with_capacity(retired.len() + 1);
        keys.insert(active_kid.to_string(), DecodingKey::from_ed_der(&public_raw));

        for (kid, pem) in retired {
            let raw = decode_ed25519_public_key_pem(pem).map_err(|e| {
                KeyStoreError::InvalidPublicKey {
                    kid: kid.clone(),
                    reason: e.to_string(),
                }
            })?;
            keys.insert(kid.clone(), DecodingKey::from_ed_der(&raw));
        }

        Ok(Self {
            signing: SigningKey {
                kid: active_kid.to_string(),
                encoding_key: EncodingKey::from_ed_der(pkcs8.expose_secret()),
            },
            verification: VerificationKeys {
                active_kid: active_kid.to_string(),
                keys,
            },
        })
    }

    /// Generate a fresh random keypair (development and tests).
    ///
    /// # Errors
    ///
    /// `Generation` if the system RNG fails.
    pub fn generate(kid: &str) -> Result<Self, KeyStoreError> {
        let (private_pem, public_pem) = generate_keypair_pem()?;
        Self::from_pem(kid, &private_pem, &public_pem, &[])
    }

    /// Split into the issuer's and the verifier's halves.
    #[must_use]
    pub fn into_parts(self) -> (SigningKey, VerificationKeys) {
        (self.signing, self.verification)
    }

    #[must_use]
    pub fn verification_keys(&self) -> &VerificationKeys {
        &self.verification
    }
}

/// Generate an Ed25519 keypair as (PKCS#8 private PEM, SPKI public PEM).
///
/// # Errors
///
/// `Generation` if the system RNG fails.
pub fn generate_keypair_pem() -> Result<(SecretBox<String>, String), KeyStoreError> {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
        .map_err(|e| KeyStoreError::Generation(format!("Keypair generation failed: {e}")))?;
    let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
        .map_err(|e| KeyStoreError::Generation(format!("Keypair parsing failed: {e}")))?;

    let private_pem = common::jwt::encode_pkcs8_private_key_pem(pkcs8.as_ref());
    let public_pem = encode_ed25519_public_key_pem(key_pair.public_key().as_ref());

    Ok((SecretBox::new(Box::new(private_pem)), public_pem))
}

fn read_key_file(path: &Path) -> Result<SecretBox<String>, KeyStoreError> {
    std::fs::read_to_string(path)
        .map(|s| SecretBox::new(Box::new(s)))
        .map_err(|source| KeyStoreError::Read {
            path: path.display().to_string(),
            source,
        })
}

// ============================================================================
// Password hashing
// ============================================================================

/// Hash a password with bcrypt.
///
/// # Errors
///
/// Returns `AuthError::Crypto` if the cost is outside 10-14 or hashing fails.
#[instrument(skip_all)]
pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&cost) {
        return Err(AuthError::Crypto(format!(
            "Invalid bcrypt cost: {cost} (must be {MIN_BCRYPT_COST}-{MAX_BCRYPT_COST})"
        )));
    }

    bcrypt::hash(password, cost).map_err(|e| AuthError::Crypto(format!("Password hashing failed: {e}")))
}

/// Verify a password against a bcrypt hash.
#[instrument(skip_all)]
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(password, hash)
        .map_err(|e| AuthError::Crypto(format!("Password verification failed: {e}")))
}

/// Burn the same bcrypt work as a real check when the identity does not exist,
/// so response timing does not reveal which login identifiers are registered.
#[instrument(skip_all)]
pub fn verify_against_dummy(password: &str, cost: u32) {
    static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();

    let dummy = DUMMY_HASH.get_or_init(|| bcrypt::hash("bundlehub-dummy-password", cost).ok());
    if let Some(hash) = dummy {
        let _ = bcrypt::verify(password, hash);
    }
}
