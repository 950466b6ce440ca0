//! Catalog relations

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SidecarFormat;

/// One row per distinct artifact path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub artifact_id: String,
    pub canonical_path: PathBuf,
    pub format_tag: String,
    /// Version with the maximal `created_at`
    pub latest_version_id: String,
    pub version_count: usize,
}

/// One immutable row per version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version_id: String,
    pub artifact_id: String,
    /// Hash of the codec's canonical encoding
    pub content_hash: String,
    /// Hash of the producing code, when tracked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_hash: Option<String>,
    /// Hash of the bytes on disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// Sidecar representations stored in the snapshot
    #[serde(default)]
    pub sidecar_format: Vec<SidecarFormat>,
}

impl VersionRecord {
    /// Ordering key: creation time, then id for same-instant versions.
    pub fn chronology(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.version_id.as_str())
    }
}

/// Fields used to insert or refresh an [`ArtifactRecord`].
#[derive(Debug, Clone)]
pub struct ArtifactUpdate {
    pub canonical_path: PathBuf,
    pub format_tag: String,
}

/// Version row as stored, before timestamp validation.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawVersionRow {
    pub version_id: String,
    pub artifact_id: String,
    pub content_hash: String,
    #[serde(default)]
    pub code_hash: Option<String>,
    #[serde(default)]
    pub file_hash: Option<String>,
    pub size_bytes: u64,
    pub created_at: String,
    #[serde(default)]
    pub sidecar_format: Vec<SidecarFormat>,
}

impl RawVersionRow {
    /// Parse the timestamp; `None` if it is not valid RFC 3339.
    pub fn into_record(self) -> Option<VersionRecord> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .ok()?
            .with_timezone(&Utc);
        Some(VersionRecord {
            version_id: self.version_id,
            artifact_id: self.artifact_id,
            content_hash: self.content_hash,
            code_hash: self.code_hash,
            file_hash: self.file_hash,
            size_bytes: self.size_bytes,
            created_at,
            sidecar_format: self.sidecar_format,
        })
    }
}
