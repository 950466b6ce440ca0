//! Durable catalog file with locked read-modify-write

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use artifact_vault_lock::{with_lock, CatalogLock};
use serde::Deserialize;

use super::records::RawVersionRow;
use super::{ArtifactRecord, ArtifactUpdate, Catalog, ParentsIndex, VersionRecord, SCHEMA_ID, SCHEMA_VERSION};
use crate::error::{IoResultExt, VaultError, VaultResult};
use crate::fsutil::atomic_write;

/// Catalog document as stored. Version rows are kept raw until their
/// timestamps have been checked.
#[derive(Debug, Deserialize)]
struct StoredCatalog {
    #[serde(default)]
    schema_version: Option<u32>,
    #[serde(default)]
    artifacts: Vec<ArtifactRecord>,
    #[serde(default)]
    versions: Vec<RawVersionRow>,
    #[serde(default)]
    parents_index: Option<ParentsIndex>,
}

/// Owner of `catalog.json` and its lock.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    path: PathBuf,
    lock: Arc<dyn CatalogLock>,
    lock_timeout: Duration,
}

impl CatalogStore {
    pub fn new(path: impl Into<PathBuf>, lock: Arc<dyn CatalogLock>, lock_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            lock,
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock(&self) -> &Arc<dyn CatalogLock> {
        &self.lock
    }

    /// Load the catalog without locking.
    ///
    /// A missing file yields an empty catalog. Version rows whose timestamp
    /// does not parse are dropped with a warning.
    pub fn read(&self) -> VaultResult<Catalog> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Catalog::default()),
            Err(e) => return Err(VaultError::io(&self.path, e)),
        };

        let stored: StoredCatalog = serde_json::from_slice(&bytes).map_err(|e| VaultError::CatalogCorrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        if let Some(version) = stored.schema_version {
            if version > SCHEMA_VERSION {
                return Err(VaultError::CatalogCorrupt {
                    path: self.path.clone(),
                    reason: format!("unsupported schema_version {version}"),
                });
            }
        }

        let total = stored.versions.len();
        let mut versions = Vec::with_capacity(total);
        for row in stored.versions {
            let version_id = row.version_id.clone();
            let created_at = row.created_at.clone();
            match row.into_record() {
                Some(record) => versions.push(record),
                None => tracing::warn!(
                    catalog = %self.path.display(),
                    %version_id,
                    %created_at,
                    "dropping version row with invalid timestamp"
                ),
            }
        }

        let mut catalog = Catalog {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            artifacts: stored.artifacts,
            versions,
            parents_index: stored.parents_index,
        };

        catalog.mark_index_stale();
        if catalog.versions.len() != total {
            let before = catalog.artifacts.len();
            catalog.reconcile_all();
            if catalog.artifacts.len() != before {
                tracing::warn!(
                    dropped = before - catalog.artifacts.len(),
                    "artifacts left without valid versions were dropped"
                );
            }
        }

        Ok(catalog)
    }

    /// Replace the durable catalog. Callers hold the write lock.
    pub fn write(&self, catalog: &Catalog) -> VaultResult<()> {
        let mut bytes = serde_json::to_vec_pretty(catalog)?;
        bytes.push(b'\n');
        atomic_write(&self.path, &bytes).at(&self.path)
    }

    /// Locked read, mutate, write. The catalog is only written if `f`
    /// succeeds.
    pub fn mutate<T, F>(&self, f: F) -> VaultResult<T>
    where
        F: FnOnce(&mut Catalog) -> VaultResult<T>,
    {
        with_lock(self.lock.as_ref(), self.lock_timeout, || {
            let mut catalog = self.read()?;
            let out = f(&mut catalog)?;
            self.write(&catalog)?;
            Ok(out)
        })
    }

    /// Append a version and upsert its artifact in one locked mutation.
    pub fn record_version(
        &self,
        version: VersionRecord,
        update: ArtifactUpdate,
        parent_ids: &[String],
    ) -> VaultResult<ArtifactRecord> {
        let version_id = version.version_id.clone();
        let record = self.mutate(|catalog| Ok(catalog.apply_version(version, update, parent_ids)))?;
        tracing::debug!(
            artifact = %record.canonical_path.display(),
            %version_id,
            version_count = record.version_count,
            "version recorded"
        );
        Ok(record)
    }

    /// Remove version rows of one artifact; returns the rows removed.
    pub fn remove_versions(
        &self,
        artifact_id: &str,
        version_ids: &BTreeSet<String>,
    ) -> VaultResult<Vec<VersionRecord>> {
        if version_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.mutate(|catalog| Ok(catalog.remove_versions(artifact_id, version_ids)))
    }

    /// Replace the reverse index with one computed by `build` from the
    /// catalog read under lock.
    pub fn rebuild_index<F>(&self, build: F) -> VaultResult<ParentsIndex>
    where
        F: FnOnce(&Catalog) -> VaultResult<ParentsIndex>,
    {
        self.mutate(|catalog| {
            let index = build(catalog)?;
            catalog.parents_index = Some(index.clone());
            Ok(index)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artifact_vault_lock::MarkerLock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CatalogStore {
        let lock = MarkerLock::new(dir.path().join("catalog.lock.marker"));
        CatalogStore::new(dir.path().join("catalog.json"), Arc::new(lock), Duration::from_secs(2))
    }

    fn version(id: &str, second: u32) -> VersionRecord {
        VersionRecord {
            version_id: id.to_string(),
            artifact_id: "a".to_string(),
            content_hash: "h".to_string(),
            code_hash: None,
            file_hash: None,
            size_bytes: 4,
            created_at: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, second).unwrap(),
            sidecar_format: vec![],
        }
    }

    fn update() -> ArtifactUpdate {
        ArtifactUpdate {
            canonical_path: PathBuf::from("/data/a.json"),
            format_tag: "json".to_string(),
        }
    }

    #[test]
    fn test_read_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let catalog = store(&dir).read().unwrap();
        assert!(catalog.artifacts.is_empty());
        assert!(catalog.index_is_current());
    }

    #[test]
    fn test_read_corrupt_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("catalog.json"), "{ not json").unwrap();

        let err = store(&dir).read().unwrap_err();
        assert!(matches!(err, VaultError::CatalogCorrupt { .. }));
    }

    #[test]
    fn test_record_version_persists() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.record_version(version("v1", 0), update(), &[]).unwrap();
        let record = store.record_version(version("v2", 1), update(), &[]).unwrap();

        assert_eq!(record.version_count, 2);
        let catalog = store.read().unwrap();
        assert_eq!(catalog.versions.len(), 2);
        assert_eq!(catalog.artifact("a").unwrap().latest_version_id, "v2");
        assert!(!dir.path().join("catalog.lock.marker").exists(), "lock released");
    }

    #[test]
    fn test_failed_mutation_leaves_catalog() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.record_version(version("v1", 0), update(), &[]).unwrap();

        let result: VaultResult<()> = store.mutate(|catalog| {
            catalog.versions.clear();
            Err(VaultError::Config("boom".into()))
        });

        assert!(result.is_err());
        assert_eq!(store.read().unwrap().versions.len(), 1);
    }

    #[test]
    fn test_invalid_timestamp_rows_dropped() {
        let dir = TempDir::new().unwrap();
        let doc = json!({
            "schema_version": 1,
            "schema_id": SCHEMA_ID,
            "artifacts": [
                {"artifact_id": "a", "canonical_path": "/data/a.json", "format_tag": "json",
                 "latest_version_id": "v2", "version_count": 2},
                {"artifact_id": "b", "canonical_path": "/data/b.json", "format_tag": "json",
                 "latest_version_id": "w1", "version_count": 1}
            ],
            "versions": [
                {"version_id": "v1", "artifact_id": "a", "content_hash": "h", "size_bytes": 1,
                 "created_at": "2026-02-01T00:00:00Z"},
                {"version_id": "v2", "artifact_id": "a", "content_hash": "h", "size_bytes": 1,
                 "created_at": "not a time"},
                {"version_id": "w1", "artifact_id": "b", "content_hash": "h", "size_bytes": 1,
                 "created_at": "garbage"}
            ]
        });
        fs::write(dir.path().join("catalog.json"), doc.to_string()).unwrap();

        let catalog = store(&dir).read().unwrap();

        assert_eq!(catalog.versions.len(), 1);
        let a = catalog.artifact("a").unwrap();
        assert_eq!(a.latest_version_id, "v1");
        assert_eq!(a.version_count, 1);
        assert!(catalog.artifact("b").is_none());
    }

    #[test]
    fn test_newer_schema_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("catalog.json"),
            json!({"schema_version": 99, "artifacts": [], "versions": []}).to_string(),
        )
        .unwrap();

        assert!(matches!(
            store(&dir).read().unwrap_err(),
            VaultError::CatalogCorrupt { .. }
        ));
    }

    #[test]
    fn test_remove_versions_noop_when_empty() {
        let dir = TempDir::new().unwrap();
        let removed = store(&dir).remove_versions("a", &BTreeSet::new()).unwrap();
        assert!(removed.is_empty());
        assert!(!dir.path().join("catalog.json").exists());
    }
}
