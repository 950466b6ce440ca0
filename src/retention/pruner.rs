//! Retention pruner
//!
//! Deletes snapshot directories and their version rows in one locked catalog
//! mutation. The latest version is never removed, and pruning an already
//! pruned history is a no-op.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::policy::{evaluate, RetentionPolicy};
use crate::catalog::{Catalog, CatalogStore};
use crate::error::{VaultError, VaultResult};
use crate::vault::Vault;
use crate::version::SnapshotStore;

/// A version removed (or, in a dry run, selected for removal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrunedVersion {
    pub artifact_path: PathBuf,
    pub version_id: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub dry_run: bool,
    pub removed: Vec<PrunedVersion>,
    /// Snapshot bytes freed on disk
    pub bytes_reclaimed: u64,
    /// Non-fatal failures, one per artifact or snapshot
    pub errors: Vec<String>,
}

impl PruneReport {
    fn absorb(&mut self, other: PruneReport) {
        self.removed.extend(other.removed);
        self.bytes_reclaimed += other.bytes_reclaimed;
        self.errors.extend(other.errors);
    }
}

pub struct Pruner<'a> {
    catalog: &'a CatalogStore,
    snapshots: &'a SnapshotStore,
}

impl<'a> Pruner<'a> {
    pub fn new(catalog: &'a CatalogStore, snapshots: &'a SnapshotStore) -> Self {
        Self { catalog, snapshots }
    }

    /// Apply `policy` to one artifact.
    pub fn prune(
        &self,
        artifact_id: &str,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> VaultResult<PruneReport> {
        if dry_run {
            let catalog = self.catalog.read()?;
            return self.plan(&catalog, artifact_id, policy, now, true);
        }

        self.catalog.mutate(|catalog| {
            let mut report = self.plan(catalog, artifact_id, policy, now, false)?;
            if report.removed.is_empty() {
                return Ok(report);
            }

            let mut deleted = BTreeSet::new();
            let mut removed = Vec::with_capacity(report.removed.len());
            for version in std::mem::take(&mut report.removed) {
                let dir = self
                    .snapshots
                    .snapshot_dir(&version.artifact_path, artifact_id, &version.version_id);
                match self.snapshots.remove(&dir) {
                    Ok(bytes) => {
                        tracing::info!(
                            artifact = %version.artifact_path.display(),
                            version_id = %version.version_id,
                            bytes,
                            "pruned version"
                        );
                        report.bytes_reclaimed += bytes;
                        deleted.insert(version.version_id.clone());
                        removed.push(version);
                    }
                    Err(e) => {
                        tracing::warn!(snapshot = %dir.display(), error = %e, "failed to delete snapshot");
                        report.errors.push(e.to_string());
                    }
                }
            }

            catalog.remove_versions(artifact_id, &deleted);
            report.removed = removed;
            Ok(report)
        })
    }

    /// Apply `policy` to every artifact, continuing past failures.
    pub fn prune_all(&self, policy: &RetentionPolicy, now: DateTime<Utc>, dry_run: bool) -> VaultResult<PruneReport> {
        let catalog = self.catalog.read()?;
        let mut report = PruneReport {
            dry_run,
            ..PruneReport::default()
        };

        for artifact in &catalog.artifacts {
            match self.prune(&artifact.artifact_id, policy, now, dry_run) {
                Ok(one) => report.absorb(one),
                Err(e) => {
                    tracing::warn!(artifact = %artifact.canonical_path.display(), error = %e, "prune failed");
                    report
                        .errors
                        .push(format!("{}: {e}", artifact.canonical_path.display()));
                }
            }
        }
        Ok(report)
    }

    /// Versions `policy` would delete, without touching anything.
    fn plan(
        &self,
        catalog: &Catalog,
        artifact_id: &str,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> VaultResult<PruneReport> {
        let mut report = PruneReport {
            dry_run,
            ..PruneReport::default()
        };
        // Pruned away by an earlier run
        let Some(record) = catalog.artifact(artifact_id) else {
            return Ok(report);
        };

        let versions = catalog.versions_of(artifact_id);
        let decision = evaluate(&versions, &record.latest_version_id, policy, now);
        for version in versions {
            if decision.delete.contains(&version.version_id) {
                if dry_run {
                    tracing::info!(
                        artifact = %record.canonical_path.display(),
                        version_id = %version.version_id,
                        "dry run: would prune version"
                    );
                }
                report.removed.push(PrunedVersion {
                    artifact_path: record.canonical_path.clone(),
                    version_id: version.version_id.clone(),
                    created_at: version.created_at,
                    size_bytes: version.size_bytes,
                });
            }
        }
        Ok(report)
    }
}

impl Vault {
    /// Apply `policy` to the artifact at `path`.
    pub fn prune(&self, path: impl AsRef<Path>, policy: &RetentionPolicy, dry_run: bool) -> VaultResult<PruneReport> {
        policy.validate()?;
        let canonical = self.canonical(path);
        let record = self
            .catalog
            .read()?
            .artifact_by_path(&canonical)
            .cloned()
            .ok_or(VaultError::ArtifactNotFound { path: canonical })?;
        Pruner::new(&self.catalog, &self.snapshots).prune(&record.artifact_id, policy, self.clock.now(), dry_run)
    }

    /// Apply `policy` to every tracked artifact.
    pub fn prune_all(&self, policy: &RetentionPolicy, dry_run: bool) -> VaultResult<PruneReport> {
        policy.validate()?;
        Pruner::new(&self.catalog, &self.snapshots).prune_all(policy, self.clock.now(), dry_run)
    }

    /// Retention after a version-creating save. Failures are logged; the save
    /// itself already succeeded.
    pub(crate) fn apply_retention(&self, artifact_id: &str) -> Vec<PrunedVersion> {
        let policy = self.options.retention;
        if policy.is_keep_all() {
            return Vec::new();
        }
        match Pruner::new(&self.catalog, &self.snapshots).prune(artifact_id, &policy, self.clock.now(), false) {
            Ok(report) => report.removed,
            Err(e) => {
                tracing::warn!(%artifact_id, error = %e, "retention after save failed");
                Vec::new()
            }
        }
    }
}
