//! Version identifiers
//!
//! `YYYYMMDDTHHMMSS.ffffffZ-<12 hex>`: the timestamp prefix sorts
//! chronologically, the suffix is a SHA-256 over every input so two writers
//! in the same microsecond still get distinct ids unless their inputs match.

use chrono::{DateTime, Utc};

use crate::hash::sha256_fields;

/// Hex characters kept from the digest.
pub const SUFFIX_LEN: usize = 12;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

pub fn version_id(
    artifact_id: &str,
    content_hash: &str,
    code_hash: Option<&str>,
    created_at: DateTime<Utc>,
) -> String {
    let stamp = created_at.format(TIMESTAMP_FORMAT).to_string();
    let digest = sha256_fields([
        artifact_id.as_bytes(),
        content_hash.as_bytes(),
        code_hash.unwrap_or_default().as_bytes(),
        stamp.as_bytes(),
    ]);
    format!("{stamp}-{}", &digest[..SUFFIX_LEN])
}
