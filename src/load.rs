//! Loading artifacts and checking stored hashes

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::codec::ArtifactData;
use crate::error::{VaultError, VaultResult};
use crate::identity::artifact_id;
use crate::sidecar::Sidecar;
use crate::vault::Vault;

/// Result of comparing bytes on disk with a recorded hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Integrity {
    Ok,
    Mismatch { expected: String, actual: String },
    Missing,
    /// Nothing recorded to compare against
    Unrecorded,
}

impl Integrity {
    fn check(expected: Option<&str>, actual: Option<String>) -> Self {
        match (expected, actual) {
            (_, None) => Integrity::Missing,
            (None, Some(_)) => Integrity::Unrecorded,
            (Some(e), Some(a)) if e == a => Integrity::Ok,
            (Some(e), Some(a)) => Integrity::Mismatch {
                expected: e.to_string(),
                actual: a,
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Integrity::Ok | Integrity::Unrecorded)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionIntegrity {
    pub version_id: String,
    pub integrity: Integrity,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub path: PathBuf,
    /// Live file against the latest version's file hash
    pub live: Integrity,
    /// Each snapshot against its version's file hash, oldest first
    pub versions: Vec<VersionIntegrity>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.live.is_ok() && self.versions.iter().all(|v| v.integrity.is_ok())
    }
}

impl Vault {
    /// Decode the live artifact with the codec that wrote it.
    pub fn load(&self, path: impl AsRef<Path>) -> VaultResult<ArtifactData> {
        let canonical = self.canonical(path);
        if !canonical.is_file() {
            return Err(VaultError::ArtifactNotFound { path: canonical });
        }

        let catalog = self.catalog.read()?;
        let format = match catalog.artifact(&artifact_id(&canonical)) {
            Some(record) => record.format_tag.clone(),
            None => match Sidecar::read(&canonical, &self.options.sidecar_formats())? {
                Some(sidecar) => sidecar.format_tag,
                None => return Err(VaultError::ArtifactNotFound { path: canonical }),
            },
        };
        self.codecs.get(&format)?.read(&canonical)
    }

    /// Decode a past version from its snapshot.
    pub fn load_version(&self, path: impl AsRef<Path>, version_id: &str) -> VaultResult<ArtifactData> {
        let canonical = self.canonical(path);
        let catalog = self.catalog.read()?;
        let record = catalog
            .artifact(&artifact_id(&canonical))
            .ok_or_else(|| VaultError::ArtifactNotFound { path: canonical.clone() })?;
        if catalog.version(&record.artifact_id, version_id).is_none() {
            return Err(VaultError::VersionNotFound {
                path: canonical,
                version_id: version_id.to_string(),
            });
        }

        let dir = self.snapshot_dir(record, version_id);
        let bytes = self.snapshots.load_bytes(&dir)?;
        self.codecs.get(&record.format_tag)?.decode(bytes)
    }

    /// Recompute file hashes of the live artifact and every snapshot.
    pub fn verify(&self, path: impl AsRef<Path>) -> VaultResult<VerifyReport> {
        let canonical = self.canonical(path);
        let catalog = self.catalog.read()?;
        let record = catalog
            .artifact(&artifact_id(&canonical))
            .ok_or_else(|| VaultError::ArtifactNotFound { path: canonical.clone() })?;

        let live_hash = match fs::read(&canonical) {
            Ok(bytes) => Some(self.hasher.hash(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(VaultError::io(&canonical, e)),
        };
        let latest = catalog.latest_version(&record.artifact_id);
        let live = Integrity::check(latest.and_then(|v| v.file_hash.as_deref()), live_hash);

        let mut versions = Vec::new();
        for version in catalog.versions_of(&record.artifact_id) {
            let dir = self.snapshot_dir(record, &version.version_id);
            let actual = self.snapshots.load_bytes(&dir).ok().map(|b| self.hasher.hash(&b));
            let integrity = Integrity::check(version.file_hash.as_deref(), actual);
            if !integrity.is_ok() {
                tracing::warn!(
                    artifact = %canonical.display(),
                    version_id = %version.version_id,
                    ?integrity,
                    "snapshot failed verification"
                );
            }
            versions.push(VersionIntegrity {
                version_id: version.version_id.clone(),
                integrity,
            });
        }

        Ok(VerifyReport {
            path: canonical,
            live,
            versions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultOptions;
    use crate::save::SaveRequest;
    use serde_json::json;
    use tempfile::TempDir;

    fn vault(dir: &TempDir) -> Vault {
        Vault::open_with(dir.path(), VaultOptions::default()).unwrap()
    }

    #[test]
    fn test_round_trip_json() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        let value = json!({"rows": [1, 2, 3], "name": "clean"});
        vault.save(SaveRequest::new("out/clean.json", value.clone())).unwrap();

        assert_eq!(vault.load("out/clean.json").unwrap(), ArtifactData::Json(value));
    }

    #[test]
    fn test_load_past_version() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        let first = vault.save(SaveRequest::new("a.txt", "one")).unwrap();
        vault.save(SaveRequest::new("a.txt", "two")).unwrap();

        let old = vault
            .load_version("a.txt", first.version_id.as_deref().unwrap())
            .unwrap();

        assert_eq!(old, ArtifactData::Text("one".into()));
        assert!(matches!(
            vault.load_version("a.txt", "missing"),
            Err(VaultError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        vault.save(SaveRequest::new("a.txt", "one")).unwrap();
        assert!(vault.verify("a.txt").unwrap().is_clean());

        fs::write(dir.path().join("a.txt"), "tampered").unwrap();
        let report = vault.verify("a.txt").unwrap();

        assert!(!report.is_clean());
        assert!(matches!(report.live, Integrity::Mismatch { .. }));
        assert!(report.versions[0].integrity.is_ok());
    }

    #[test]
    fn test_load_untracked() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        fs::write(dir.path().join("x.txt"), "x").unwrap();

        assert!(matches!(vault.load("x.txt"), Err(VaultError::ArtifactNotFound { .. })));
    }
}
