//! Strict staleness: compare recorded parent versions with current latest

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::catalog::Catalog;
use crate::error::VaultResult;
use crate::identity::artifact_id;
use crate::vault::Vault;

use super::plan::PlanReason;

/// A recorded parent whose version is no longer current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentDrift {
    pub path: PathBuf,
    pub recorded_version: String,
    /// `None` when the parent is no longer tracked
    pub current_version: Option<String>,
}

impl Vault {
    /// True if any recorded parent version differs from that parent's
    /// current latest, or a recorded parent is gone.
    pub fn is_stale(&self, path: impl AsRef<Path>) -> VaultResult<bool> {
        Ok(!self.parent_drift(path)?.is_empty())
    }

    /// Recorded parents that moved on since `path` was produced.
    pub fn parent_drift(&self, path: impl AsRef<Path>) -> VaultResult<Vec<ParentDrift>> {
        let canonical = self.canonical(path);
        let catalog = self.catalog.read()?;
        self.drift_in(&catalog, &canonical)
    }

    fn drift_in(&self, catalog: &Catalog, canonical: &Path) -> VaultResult<Vec<ParentDrift>> {
        let (parents, _) = self.direct_parents(catalog, canonical)?;
        let drift = parents
            .into_iter()
            .filter_map(|parent| {
                let current = catalog
                    .artifact(&parent.artifact_id)
                    .map(|a| a.latest_version_id.clone());
                (current.as_deref() != Some(parent.version_id.as_str())).then(|| ParentDrift {
                    path: parent.path,
                    recorded_version: parent.version_id,
                    current_version: current,
                })
            })
            .collect();
        Ok(drift)
    }

    /// Why `canonical` needs rebuilding under strict checks, if it does.
    pub(crate) fn strict_reason(&self, catalog: &Catalog, canonical: &Path) -> VaultResult<Option<PlanReason>> {
        let id = artifact_id(canonical);
        let Some(latest) = catalog.latest_version(&id) else {
            return Ok(Some(PlanReason::Missing));
        };
        if !canonical.is_file() {
            return Ok(Some(PlanReason::Missing));
        }

        if !self.drift_in(catalog, canonical)?.is_empty() {
            return Ok(Some(PlanReason::ParentChanged));
        }

        let registered = self
            .builders
            .get(canonical)
            .and_then(|r| r.code.as_deref())
            .map(|code| self.hasher.hash(code.as_bytes()));
        if let (Some(stored), Some(current)) = (latest.code_hash.as_deref(), registered.as_deref()) {
            if stored != current {
                return Ok(Some(PlanReason::CodeChanged));
            }
        }
        Ok(None)
    }
}
