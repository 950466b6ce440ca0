//! Catalog: the durable registry of artifacts and versions
//!
//! Two relations plus the reverse-lineage index, stored as a single JSON
//! document at `<state>/catalog.json`. Every mutation is a locked
//! read-modify-write that replaces the file atomically; plain reads take no
//! lock and may observe a slightly stale catalog.

mod index;
mod records;
mod store;

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub use index::{ChildRef, ParentsIndex};
pub use records::{ArtifactRecord, ArtifactUpdate, VersionRecord};
pub use store::CatalogStore;

/// Schema version for catalog.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier for catalog.json
pub const SCHEMA_ID: &str = "artifact-vault/catalog@1";

/// In-memory catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub schema_version: u32,
    pub schema_id: String,
    pub artifacts: Vec<ArtifactRecord>,
    pub versions: Vec<VersionRecord>,
    /// Absent in catalogs written without an index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents_index: Option<ParentsIndex>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            artifacts: Vec::new(),
            versions: Vec::new(),
            parents_index: Some(ParentsIndex::default()),
        }
    }
}

impl Catalog {
    pub fn artifact(&self, artifact_id: &str) -> Option<&ArtifactRecord> {
        self.artifacts.iter().find(|a| a.artifact_id == artifact_id)
    }

    pub fn artifact_by_path(&self, canonical: &Path) -> Option<&ArtifactRecord> {
        self.artifacts.iter().find(|a| a.canonical_path == canonical)
    }

    pub fn version(&self, artifact_id: &str, version_id: &str) -> Option<&VersionRecord> {
        self.versions
            .iter()
            .find(|v| v.artifact_id == artifact_id && v.version_id == version_id)
    }

    /// Versions of an artifact, oldest first.
    pub fn versions_of(&self, artifact_id: &str) -> Vec<&VersionRecord> {
        let mut versions: Vec<&VersionRecord> = self
            .versions
            .iter()
            .filter(|v| v.artifact_id == artifact_id)
            .collect();
        versions.sort_by(|a, b| a.chronology().cmp(&b.chronology()));
        versions
    }

    /// The latest version record of an artifact.
    pub fn latest_version(&self, artifact_id: &str) -> Option<&VersionRecord> {
        let artifact = self.artifact(artifact_id)?;
        self.version(artifact_id, &artifact.latest_version_id)
    }

    /// Whether the reverse index reflects every version row.
    pub fn index_is_current(&self) -> bool {
        self.parents_index
            .as_ref()
            .is_some_and(|i| !i.stale && i.covers_versions == self.versions.len())
    }

    /// Flag an index that no longer matches the version rows. Only a rebuild
    /// clears the flag, so a row count that later matches again by accident
    /// never revives it.
    pub(crate) fn mark_index_stale(&mut self) {
        let rows = self.versions.len();
        if let Some(index) = self.parents_index.as_mut() {
            if !index.stale && index.covers_versions != rows {
                tracing::debug!(covers_versions = index.covers_versions, rows, "reverse index marked stale");
            }
            index.stale |= index.covers_versions != rows;
        }
    }

    /// Append a version, upsert its artifact and update the reverse index.
    ///
    /// `latest_version_id` only moves if the new version is the most recent,
    /// so interleaved writers with skewed clocks keep the invariant.
    pub fn apply_version(
        &mut self,
        version: VersionRecord,
        update: ArtifactUpdate,
        parent_ids: &[String],
    ) -> ArtifactRecord {
        if self.version(&version.artifact_id, &version.version_id).is_some() {
            tracing::debug!(version_id = %version.version_id, "version already recorded");
            return self.refresh_artifact(&version.artifact_id, update);
        }

        let index_current = self.index_is_current();
        let child = ChildRef {
            child_artifact_id: version.artifact_id.clone(),
            child_version_id: version.version_id.clone(),
        };
        let artifact_id = version.artifact_id.clone();
        self.versions.push(version);

        if let Some(index) = self.parents_index.as_mut() {
            if index_current {
                index.add_version(parent_ids, &child);
            } else {
                tracing::debug!("reverse index is stale, leaving it for a rebuild");
                index.stale = true;
            }
        }

        self.refresh_artifact(&artifact_id, update)
    }

    /// Drop version rows of one artifact and repair its record.
    ///
    /// Returns the removed rows.
    pub fn remove_versions(&mut self, artifact_id: &str, version_ids: &BTreeSet<String>) -> Vec<VersionRecord> {
        let index_current = self.index_is_current();
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.versions)
            .into_iter()
            .partition(|v| v.artifact_id == artifact_id && version_ids.contains(&v.version_id));
        self.versions = kept;

        if let Some(index) = self.parents_index.as_mut() {
            let removed_ids: BTreeSet<String> = removed.iter().map(|v| v.version_id.clone()).collect();
            if index_current {
                index.remove_child_versions(artifact_id, &removed_ids);
            } else if !removed.is_empty() {
                index.stale = true;
            }
        }

        self.reconcile_artifact(artifact_id);
        removed
    }

    /// Recompute `latest_version_id` and `version_count` from version rows.
    /// An artifact left without rows is removed.
    fn reconcile_artifact(&mut self, artifact_id: &str) {
        let latest = self
            .versions
            .iter()
            .filter(|v| v.artifact_id == artifact_id)
            .max_by(|a, b| a.chronology().cmp(&b.chronology()))
            .map(|v| v.version_id.clone());
        let count = self.versions.iter().filter(|v| v.artifact_id == artifact_id).count();

        match latest {
            Some(latest) => {
                if let Some(record) = self.artifacts.iter_mut().find(|a| a.artifact_id == artifact_id) {
                    record.latest_version_id = latest;
                    record.version_count = count;
                }
            }
            None => self.artifacts.retain(|a| a.artifact_id != artifact_id),
        }
    }

    fn refresh_artifact(&mut self, artifact_id: &str, update: ArtifactUpdate) -> ArtifactRecord {
        let newest = self
            .versions
            .iter()
            .filter(|v| v.artifact_id == artifact_id)
            .max_by(|a, b| a.chronology().cmp(&b.chronology()))
            .map(|v| v.version_id.clone())
            .unwrap_or_default();
        let count = self.versions.iter().filter(|v| v.artifact_id == artifact_id).count();

        match self.artifacts.iter_mut().find(|a| a.artifact_id == artifact_id) {
            Some(record) => {
                record.latest_version_id = newest;
                record.version_count = count;
                record.format_tag = update.format_tag;
                record.clone()
            }
            None => {
                let record = ArtifactRecord {
                    artifact_id: artifact_id.to_string(),
                    canonical_path: update.canonical_path,
                    format_tag: update.format_tag,
                    latest_version_id: newest,
                    version_count: count,
                };
                self.artifacts.push(record.clone());
                record
            }
        }
    }

    /// Drop artifacts without any valid version and repair counts. Used after
    /// loading a catalog from which invalid rows were discarded.
    pub(crate) fn reconcile_all(&mut self) {
        let ids: Vec<String> = self.artifacts.iter().map(|a| a.artifact_id.clone()).collect();
        for id in ids {
            self.reconcile_artifact(&id);
        }
        self.artifacts
            .sort_by(|a, b| match a.canonical_path.cmp(&b.canonical_path) {
                Ordering::Equal => a.artifact_id.cmp(&b.artifact_id),
                other => other,
            });
    }
}
