//! Hashing utilities shared across Docsync crates

use sha2::{Digest, Sha256};

/// Stable, filesystem-safe digest of an arbitrary storage key.
///
/// Format is `hex(sha256(key))`, always 64 lowercase hex characters.
pub fn key_digest(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}
