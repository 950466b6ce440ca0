//! Content hashing

use std::fmt;

use sha2::{Digest, Sha256};

/// Hash function collaborator: same content yields the same string, different
/// content yields a different string with high probability.
pub trait ContentHasher: fmt::Debug + Send + Sync {
    fn hash(&self, content: &[u8]) -> String;
}

/// Default hasher: lowercase hex SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn hash(&self, content: &[u8]) -> String {
        sha256_hex(content)
    }
}

/// Compute SHA-256 of bytes and return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 over several fields, each length-prefixed so that field
/// boundaries cannot be shifted to produce the same digest.
pub fn sha256_fields<'a>(fields: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    hex::encode(hasher.finalize())
}
