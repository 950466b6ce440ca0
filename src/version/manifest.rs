//! Committed parents manifest (`parents.json` inside a snapshot)

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::snapshot::is_staging_name;
use crate::error::{VaultError, VaultResult};
use crate::lineage::ParentPointer;

/// Manifest file name inside a snapshot directory.
pub const MANIFEST_FILE: &str = "parents.json";

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;
pub const MANIFEST_SCHEMA_ID: &str = "artifact-vault/parents@1";

/// Immutable record of the parents a version was produced from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentsManifest {
    pub schema_version: u32,
    pub schema_id: String,
    pub child_path: PathBuf,
    pub child_artifact_id: String,
    pub child_version_id: String,
    pub created_at: DateTime<Utc>,
    pub parents: Vec<ParentPointer>,
}

impl ParentsManifest {
    pub fn new(
        child_path: PathBuf,
        child_artifact_id: String,
        child_version_id: String,
        created_at: DateTime<Utc>,
        parents: Vec<ParentPointer>,
    ) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            schema_id: MANIFEST_SCHEMA_ID.to_string(),
            child_path,
            child_artifact_id,
            child_version_id,
            created_at,
            parents,
        }
    }

    pub fn to_bytes(&self) -> VaultResult<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Read the manifest of a snapshot; `None` when the snapshot has no parents.
pub fn read_manifest(snapshot_dir: &Path) -> VaultResult<Option<ParentsManifest>> {
    let path = snapshot_dir.join(MANIFEST_FILE);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(VaultError::io(path, e)),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Every committed manifest under the versions tree.
///
/// Staging directories are skipped and unreadable manifests are logged and
/// skipped.
pub fn scan_manifests(versions_root: &Path) -> Vec<ParentsManifest> {
    let mut manifests = Vec::new();
    let entries = WalkDir::new(versions_root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_staging_name(&e.file_name().to_string_lossy()))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && e.file_name() == MANIFEST_FILE);

    for entry in entries {
        let Some(dir) = entry.path().parent() else {
            continue;
        };
        match read_manifest(dir) {
            Ok(Some(manifest)) => manifests.push(manifest),
            Ok(None) => {}
            Err(e) => tracing::warn!(manifest = %entry.path().display(), error = %e, "skipping unreadable manifest"),
        }
    }
    manifests
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn manifest(child_version: &str) -> ParentsManifest {
        ParentsManifest::new(
            PathBuf::from("/data/b.json"),
            "b".to_string(),
            child_version.to_string(),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            vec![ParentPointer {
                path: PathBuf::from("/data/a.json"),
                artifact_id: "a".to_string(),
                version_id: "av1".to_string(),
            }],
        )
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(read_manifest(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_scan_finds_committed_and_skips_staging() {
        let dir = TempDir::new().unwrap();
        let committed = dir.path().join("b.json").join("bv1");
        let staging = dir.path().join("b.json").join(".bv2.stage.1.2");
        for (d, v) in [(&committed, "bv1"), (&staging, "bv2")] {
            fs::create_dir_all(d).unwrap();
            fs::write(d.join(MANIFEST_FILE), manifest(v).to_bytes().unwrap()).unwrap();
        }
        fs::write(dir.path().join("b.json").join("stray.json"), "{}").unwrap();

        let found = scan_manifests(dir.path());

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].child_version_id, "bv1");
        assert_eq!(found[0].schema_id, MANIFEST_SCHEMA_ID);
    }

    #[test]
    fn test_corrupt_manifest_skipped_by_scan() {
        let dir = TempDir::new().unwrap();
        let snap = dir.path().join("x").join("v1");
        fs::create_dir_all(&snap).unwrap();
        fs::write(snap.join(MANIFEST_FILE), "{").unwrap();

        assert!(read_manifest(&snap).is_err());
        assert!(scan_manifests(dir.path()).is_empty());
    }
}
