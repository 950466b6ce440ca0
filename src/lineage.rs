//! Lineage: parent pointers recorded at save time, and ancestor/descendant
//! traversal
//!
//! Committed manifests inside snapshots are the authority for every hop. The
//! live sidecar is only consulted for the first hop, and only when the current
//! version has no snapshot; a walk that reaches a version without a snapshot
//! stops there and is reported as truncated.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, ChildRef, ParentsIndex};
use crate::error::{VaultError, VaultResult};
use crate::identity::artifact_id;
use crate::sidecar::Sidecar;
use crate::vault::Vault;
use crate::version::{read_manifest, scan_manifests};

/// A declared parent. Without a version id the parent's current latest
/// version is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

impl ParentRef {
    pub fn latest(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            version_id: None,
        }
    }

    pub fn at(path: impl Into<PathBuf>, version_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version_id: Some(version_id.into()),
        }
    }
}

/// A parent resolved to a concrete catalog version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParentPointer {
    pub path: PathBuf,
    pub artifact_id: String,
    pub version_id: String,
}

/// Traversal depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Limited(usize),
    Unlimited,
}

impl Depth {
    pub fn allows(&self, level: usize) -> bool {
        match self {
            Depth::Limited(max) => level <= *max,
            Depth::Unlimited => true,
        }
    }
}

impl Default for Depth {
    fn default() -> Self {
        Depth::Limited(1)
    }
}

impl From<Option<usize>> for Depth {
    fn from(depth: Option<usize>) -> Self {
        depth.map_or(Depth::Unlimited, Depth::Limited)
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Depth::Limited(n) => write!(f, "{n}"),
            Depth::Unlimited => f.write_str("unlimited"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineageNode {
    /// 1 for direct parents or children
    pub level: usize,
    pub path: PathBuf,
    pub artifact_id: String,
    pub version_id: String,
}

/// Result of a lineage walk, ordered by level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LineageTrace {
    pub path: PathBuf,
    pub nodes: Vec<LineageNode>,
    /// A hop lacked a snapshot so the walk could not continue past it
    pub truncated: bool,
    /// Level 1 came from the live sidecar rather than a snapshot
    pub from_sidecar: bool,
}

impl LineageTrace {
    pub fn level(&self, level: usize) -> impl Iterator<Item = &LineageNode> {
        self.nodes.iter().filter(move |n| n.level == level)
    }

    pub fn paths_at(&self, level: usize) -> Vec<&Path> {
        self.level(level).map(|n| n.path.as_path()).collect()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.nodes.iter().any(|n| n.path == path)
    }

    pub fn max_level(&self) -> usize {
        self.nodes.iter().map(|n| n.level).max().unwrap_or(0)
    }
}

/// Child versions per parent artifact id.
pub(crate) type ChildGraph = BTreeMap<String, Vec<ChildRef>>;

/// Reverse index computed from committed manifests, limited to versions the
/// catalog still knows.
pub(crate) fn index_from_manifests(catalog: &Catalog, versions_root: &Path) -> ParentsIndex {
    let mut index = ParentsIndex::default();
    for manifest in scan_manifests(versions_root) {
        if catalog
            .version(&manifest.child_artifact_id, &manifest.child_version_id)
            .is_none()
        {
            continue;
        }
        let parent_ids: Vec<String> = manifest.parents.iter().map(|p| p.artifact_id.clone()).collect();
        index.add_version(
            &parent_ids,
            &ChildRef {
                child_artifact_id: manifest.child_artifact_id,
                child_version_id: manifest.child_version_id,
            },
        );
    }
    // Versions without a manifest are covered trivially
    index.covers_versions = catalog.versions.len();
    index
}

impl Vault {
    /// Resolve declared parents to catalog versions.
    ///
    /// Fails with `MissingParentVersion` before any write if a parent is not
    /// tracked or names an unknown version.
    pub(crate) fn resolve_parents(&self, catalog: &Catalog, parents: &[ParentRef]) -> VaultResult<Vec<ParentPointer>> {
        let mut resolved: Vec<ParentPointer> = Vec::with_capacity(parents.len());
        for parent in parents {
            let canonical = self.canonical(&parent.path);
            let id = artifact_id(&canonical);
            let missing = || VaultError::MissingParentVersion {
                path: canonical.clone(),
                version_id: parent.version_id.clone(),
            };

            let record = catalog.artifact(&id).ok_or_else(missing)?;
            let version_id = match &parent.version_id {
                Some(v) => catalog.version(&id, v).ok_or_else(missing)?.version_id.clone(),
                None => record.latest_version_id.clone(),
            };

            let pointer = ParentPointer {
                path: canonical.clone(),
                artifact_id: id,
                version_id,
            };
            if !resolved.contains(&pointer) {
                resolved.push(pointer);
            }
        }
        Ok(resolved)
    }

    /// Direct parents of the current version of `path`.
    ///
    /// Returns the committed manifest's parents when the latest version has a
    /// snapshot, else the sidecar pointers, else nothing.
    pub(crate) fn direct_parents(&self, catalog: &Catalog, canonical: &Path) -> VaultResult<(Vec<ParentPointer>, bool)> {
        let id = artifact_id(canonical);
        if let Some(record) = catalog.artifact(&id) {
            let dir = self.snapshot_dir(record, &record.latest_version_id);
            if self.snapshots.exists(&dir) {
                let parents = read_manifest(&dir)?.map(|m| m.parents).unwrap_or_default();
                return Ok((parents, false));
            }
        }

        match Sidecar::read(canonical, &self.options.sidecar_formats())? {
            Some(sidecar) => Ok((sidecar.parents, true)),
            None if catalog.artifact(&id).is_some() => Ok((Vec::new(), true)),
            None => Err(VaultError::ArtifactNotFound {
                path: canonical.to_path_buf(),
            }),
        }
    }

    /// Ancestors of `path`, breadth-first by level.
    pub fn parents_of(&self, path: impl AsRef<Path>, depth: Depth) -> VaultResult<LineageTrace> {
        let canonical = self.canonical(path);
        let catalog = self.catalog.read()?;
        let (first, from_sidecar) = self.direct_parents(&catalog, &canonical)?;

        let mut trace = LineageTrace {
            path: canonical.clone(),
            from_sidecar,
            ..LineageTrace::default()
        };
        if !depth.allows(1) {
            return Ok(trace);
        }

        let mut visited: BTreeSet<(String, String)> = BTreeSet::new();
        let mut queue: VecDeque<(usize, ParentPointer)> = first.into_iter().map(|p| (1, p)).collect();

        while let Some((level, pointer)) = queue.pop_front() {
            if !visited.insert((pointer.artifact_id.clone(), pointer.version_id.clone())) {
                continue;
            }
            trace.nodes.push(LineageNode {
                level,
                path: pointer.path.clone(),
                artifact_id: pointer.artifact_id.clone(),
                version_id: pointer.version_id.clone(),
            });

            if !depth.allows(level + 1) {
                continue;
            }
            if from_sidecar {
                // Sidecar pointers only ever answer level 1
                trace.truncated = true;
                continue;
            }

            let dir = self
                .snapshots
                .snapshot_dir(&pointer.path, &pointer.artifact_id, &pointer.version_id);
            if !self.snapshots.exists(&dir) {
                tracing::debug!(
                    artifact = %pointer.path.display(),
                    version_id = %pointer.version_id,
                    "lineage truncated: no snapshot for hop"
                );
                trace.truncated = true;
                continue;
            }
            match read_manifest(&dir) {
                Ok(Some(manifest)) => {
                    queue.extend(manifest.parents.into_iter().map(|p| (level + 1, p)));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(snapshot = %dir.display(), error = %e, "unreadable manifest, truncating lineage");
                    trace.truncated = true;
                }
            }
        }

        trace.nodes.sort_by(|a, b| (a.level, &a.path).cmp(&(b.level, &b.path)));
        Ok(trace)
    }

    /// Reverse lineage, from the index when it is current, else from a full
    /// manifest scan.
    pub(crate) fn child_graph(&self, catalog: &Catalog) -> ChildGraph {
        match &catalog.parents_index {
            Some(index) if catalog.index_is_current() => index.entries.clone(),
            _ => {
                tracing::debug!("reverse index absent or stale, scanning manifests");
                index_from_manifests(catalog, self.snapshots.versions_root()).entries
            }
        }
    }

    /// Descendants of `path`, breadth-first by level.
    ///
    /// A child artifact appears once, at its shallowest level, with the most
    /// recent of its versions that names the parent.
    pub fn children_of(&self, path: impl AsRef<Path>, depth: Depth) -> VaultResult<LineageTrace> {
        let canonical = self.canonical(path);
        let catalog = self.catalog.read()?;
        let root_id = artifact_id(&canonical);
        if catalog.artifact(&root_id).is_none() {
            return Err(VaultError::ArtifactNotFound { path: canonical });
        }

        let graph = self.child_graph(&catalog);
        let mut trace = LineageTrace {
            path: canonical,
            ..LineageTrace::default()
        };

        let mut seen: BTreeSet<String> = BTreeSet::from([root_id.clone()]);
        let mut frontier = vec![root_id];
        let mut level = 1;
        while !frontier.is_empty() && depth.allows(level) {
            let mut next_level: BTreeMap<String, String> = BTreeMap::new();
            for parent_id in &frontier {
                for child in graph.get(parent_id).map(Vec::as_slice).unwrap_or(&[]) {
                    if seen.contains(&child.child_artifact_id) {
                        continue;
                    }
                    let entry = next_level.entry(child.child_artifact_id.clone()).or_default();
                    if child.child_version_id > *entry {
                        *entry = child.child_version_id.clone();
                    }
                }
            }

            frontier = Vec::with_capacity(next_level.len());
            for (child_id, version_id) in next_level {
                seen.insert(child_id.clone());
                let Some(record) = catalog.artifact(&child_id) else {
                    continue;
                };
                trace.nodes.push(LineageNode {
                    level,
                    path: record.canonical_path.clone(),
                    artifact_id: child_id.clone(),
                    version_id,
                });
                frontier.push(child_id);
            }
            level += 1;
        }

        trace.nodes.sort_by(|a, b| (a.level, &a.path).cmp(&(b.level, &b.path)));
        Ok(trace)
    }

    /// Recompute the reverse index from committed manifests.
    pub fn reindex(&self) -> VaultResult<ParentsIndex> {
        let versions_root = self.snapshots.versions_root().to_path_buf();
        let index = self
            .catalog
            .rebuild_index(|catalog| Ok(index_from_manifests(catalog, &versions_root)))?;
        tracing::info!(
            parents = index.entries.len(),
            covers_versions = index.covers_versions,
            "reverse index rebuilt"
        );
        Ok(index)
    }
}
