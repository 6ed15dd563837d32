//! Sensitive values and the one-way hashes stored in their place.
//!
//! Plaintext client secrets and signed tokens only ever live inside a
//! [`Secret`]. What reaches the repository is a hash:
//!
//! - client secrets: `sha256$<salt>$<digest>`, salted per secret
//! - token values: an unsalted hex SHA-256 digest, used as a lookup aid

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Number of random bytes behind a client secret.
pub const CLIENT_SECRET_BYTES: usize = 32;

const SALT_BYTES: usize = 16;
const HASH_SCHEME: &str = "sha256";

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the memory is wiped when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for Secret {}

/// Generate a fresh client secret: 32 random bytes, URL-safe base64.
pub fn generate_client_secret() -> Secret {
    let mut bytes = [0u8; CLIENT_SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let secret = Secret::new(URL_SAFE_NO_PAD.encode(bytes));
    bytes.zeroize();
    secret
}

/// Hash a client secret with a random salt for storage.
pub fn hash_secret(secret: &Secret) -> String {
    let mut salt = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut salt);
    let salt = hex::encode(salt);
    let digest = salted_digest(&salt, secret.expose());
    format!("{HASH_SCHEME}${salt}${digest}")
}

/// Check `secret` against a hash produced by [`hash_secret`].
///
/// The digest comparison runs in constant time. A malformed stored hash
/// never verifies.
pub fn verify_secret(secret: &Secret, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(scheme), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if scheme != HASH_SCHEME {
        return false;
    }
    let actual = salted_digest(salt, secret.expose());
    actual.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Hex SHA-256 digest of a signed token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn salted_digest(salt: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}
