//! Rebuild executor
//!
//! Runs a plan level by level, sequentially. A failing entry is recorded and
//! the run continues; parents are always read at their current latest
//! version, so an entry sees what earlier levels just produced.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{VaultError, VaultResult};
use crate::identity::artifact_id;
use crate::lineage::{ParentPointer, ParentRef};
use crate::save::{SaveOutcome, SaveRequest};
use crate::vault::Vault;

use super::builder::{BuildContext, BuildInput};
use super::plan::{PlanEntry, RebuildPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildStatus {
    Built,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildEntry {
    pub level: usize,
    pub path: PathBuf,
    pub status: RebuildStatus,
    /// Version written by the builder, if any
    pub version_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    pub dry_run: bool,
    pub entries: Vec<RebuildEntry>,
}

impl RebuildReport {
    pub fn count(&self, status: RebuildStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn built(&self) -> usize {
        self.count(RebuildStatus::Built)
    }

    pub fn errors(&self) -> impl Iterator<Item = &RebuildEntry> {
        self.entries.iter().filter(|e| e.status == RebuildStatus::Error)
    }

    pub fn is_success(&self) -> bool {
        self.count(RebuildStatus::Error) == 0
    }
}

impl Vault {
    /// Execute `plan` in ascending level order.
    pub fn rebuild(&self, plan: &RebuildPlan, dry_run: bool) -> VaultResult<RebuildReport> {
        let mut report = RebuildReport {
            dry_run,
            entries: Vec::with_capacity(plan.len()),
        };

        for (level, entries) in plan.levels() {
            for entry in entries {
                let outcome = if dry_run {
                    self.rehearse(entry)
                } else {
                    self.rebuild_entry(entry)
                };

                let (status, version_id, message) = match outcome {
                    Ok(Some(saved)) if saved.is_written() => (RebuildStatus::Built, saved.version_id, None),
                    Ok(Some(saved)) => (RebuildStatus::Skipped, saved.version_id, Some(saved.reason.to_string())),
                    Ok(None) => (RebuildStatus::Skipped, None, Some("dry run".to_string())),
                    Err(e) => {
                        tracing::warn!(path = %entry.path.display(), level, error = %e, "rebuild entry failed");
                        (RebuildStatus::Error, None, Some(e.to_string()))
                    }
                };
                report.entries.push(RebuildEntry {
                    level,
                    path: entry.path.clone(),
                    status,
                    version_id,
                    message,
                });
            }
        }

        tracing::info!(
            built = report.built(),
            errors = report.count(RebuildStatus::Error),
            dry_run,
            "rebuild finished"
        );
        Ok(report)
    }

    /// Lookups only: the builder must exist and the parents must resolve.
    fn rehearse(&self, entry: &PlanEntry) -> VaultResult<Option<SaveOutcome>> {
        if !self.builders.contains(&entry.path) {
            return Err(VaultError::NoBuilderRegistered {
                path: entry.path.clone(),
            });
        }
        let parents = self.current_parents(&entry.path)?;
        tracing::info!(
            path = %entry.path.display(),
            level = entry.level,
            reason = %entry.reason,
            parents = parents.len(),
            "dry run: would rebuild"
        );
        Ok(None)
    }

    fn rebuild_entry(&self, entry: &PlanEntry) -> VaultResult<Option<SaveOutcome>> {
        let registration = self
            .builders
            .get(&entry.path)
            .cloned()
            .ok_or_else(|| VaultError::NoBuilderRegistered {
                path: entry.path.clone(),
            })?;

        let parents = self.current_parents(&entry.path)?;
        let mut inputs = Vec::with_capacity(parents.len());
        for parent in &parents {
            inputs.push(BuildInput {
                path: parent.path.clone(),
                version_id: parent.version_id.clone(),
                data: self.load_version(&parent.path, &parent.version_id)?,
            });
        }

        tracing::debug!(path = %entry.path.display(), level = entry.level, "invoking builder");
        let context = BuildContext {
            target: entry.path.clone(),
            parents: inputs,
        };
        let output = (registration.builder)(&context).map_err(|e| VaultError::BuilderFailed {
            path: entry.path.clone(),
            message: e.to_string(),
        })?;

        let mut request = SaveRequest::new(entry.path.clone(), output.data)
            .parents(parents.iter().map(|p| ParentRef::at(p.path.clone(), p.version_id.clone())));
        if let Some(record) = self.catalog.read()?.artifact(&artifact_id(&entry.path)) {
            request = request.format(record.format_tag.clone());
        }
        if let Some(code) = output.code.or(registration.code) {
            request = request.code(code);
        }
        if let Some(label) = output.label {
            request = request.attribute("label", label);
        }
        self.save(request).map(Some)
    }

    /// Recorded parents of `path`, each moved to its current latest version.
    fn current_parents(&self, path: &Path) -> VaultResult<Vec<ParentPointer>> {
        let catalog = self.catalog.read()?;
        let recorded = match self.direct_parents(&catalog, path) {
            Ok((parents, _)) => parents,
            // Never built: the builder runs without parents
            Err(VaultError::ArtifactNotFound { .. }) => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut current = Vec::with_capacity(recorded.len());
        for parent in recorded {
            let record = catalog
                .artifact(&parent.artifact_id)
                .ok_or_else(|| VaultError::MissingParentVersion {
                    path: parent.path.clone(),
                    version_id: None,
                })?;
            current.push(ParentPointer {
                path: record.canonical_path.clone(),
                artifact_id: record.artifact_id.clone(),
                version_id: record.latest_version_id.clone(),
            });
        }
        Ok(current)
    }
}
