//! Rebuild planning
//!
//! `strict` inspects the targets and their descendants and keeps only the
//! ones with a concrete mismatch. `propagate` assumes the targets are about to
//! change and schedules every reachable descendant. A node's level is its
//! longest distance from the targets, so everything it reads from is built in
//! an earlier level.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::{VaultError, VaultResult};
use crate::identity::artifact_id;
use crate::lineage::{ChildGraph, Depth};
use crate::vault::Vault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    #[default]
    Strict,
    Propagate,
}

impl FromStr for PlanMode {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(PlanMode::Strict),
            "propagate" => Ok(PlanMode::Propagate),
            other => Err(VaultError::Config(format!(
                "unknown plan mode {other:?} (expected strict or propagate)"
            ))),
        }
    }
}

impl fmt::Display for PlanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanMode::Strict => f.write_str("strict"),
            PlanMode::Propagate => f.write_str("propagate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanReason {
    /// Never built, or the live file is gone
    Missing,
    ParentChanged,
    CodeChanged,
    UpstreamChanged,
}

impl fmt::Display for PlanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanReason::Missing => "missing",
            PlanReason::ParentChanged => "parent_changed",
            PlanReason::CodeChanged => "code_changed",
            PlanReason::UpstreamChanged => "upstream_changed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub level: usize,
    pub path: PathBuf,
    pub reason: PlanReason,
    /// Latest version when the plan was made
    pub prior_version: Option<String>,
}

/// Entries ordered by level, then path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildPlan {
    pub mode: PlanMode,
    pub entries: Vec<PlanEntry>,
}

impl RebuildPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries grouped by level, ascending.
    pub fn levels(&self) -> BTreeMap<usize, Vec<&PlanEntry>> {
        let mut levels: BTreeMap<usize, Vec<&PlanEntry>> = BTreeMap::new();
        for entry in &self.entries {
            levels.entry(entry.level).or_default().push(entry);
        }
        levels
    }

    pub fn entry(&self, path: &Path) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.path == path)
    }
}

/// Descendants of `targets` within `depth`, with their shortest distance.
fn reachable(graph: &ChildGraph, targets: &BTreeSet<String>, depth: Depth) -> BTreeMap<String, usize> {
    let mut distance: BTreeMap<String, usize> = BTreeMap::new();
    let mut queue: VecDeque<(String, usize)> = targets.iter().map(|t| (t.clone(), 0)).collect();

    while let Some((node, level)) = queue.pop_front() {
        if !depth.allows(level + 1) {
            continue;
        }
        for child in graph.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
            let id = &child.child_artifact_id;
            if targets.contains(id) || distance.contains_key(id) {
                continue;
            }
            distance.insert(id.clone(), level + 1);
            queue.push_back((id.clone(), level + 1));
        }
    }
    distance
}

/// Longest distance from the targets inside the reachable subgraph. Nodes on
/// a cycle keep their shortest distance.
fn longest_levels(graph: &ChildGraph, targets: &BTreeSet<String>, shortest: &BTreeMap<String, usize>) -> BTreeMap<String, usize> {
    let in_scope = |id: &str| targets.contains(id) || shortest.contains_key(id);

    let mut indegree: BTreeMap<&str, usize> = shortest.keys().map(|k| (k.as_str(), 0)).collect();
    let mut edges: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (parent, children) in graph {
        if !in_scope(parent) {
            continue;
        }
        for child in children {
            let child_id = child.child_artifact_id.as_str();
            if child_id == parent || !shortest.contains_key(child_id) {
                continue;
            }
            if edges.entry(parent.as_str()).or_default().insert(child_id) {
                *indegree.entry(child_id).or_default() += 1;
            }
        }
    }

    let mut level: BTreeMap<String, usize> = BTreeMap::new();
    let mut queue: VecDeque<&str> = targets.iter().map(String::as_str).collect();
    for target in targets {
        level.insert(target.clone(), 0);
    }
    while let Some(node) = queue.pop_front() {
        let node_level = level.get(node).copied().unwrap_or(0);
        for &child in edges.get(node).into_iter().flatten() {
            let child_level = level.entry(child.to_string()).or_default();
            *child_level = (*child_level).max(node_level + 1);
            if let Some(remaining) = indegree.get_mut(child) {
                *remaining -= 1;
                if *remaining == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    for (id, &dist) in shortest {
        if indegree.get(id.as_str()).copied().unwrap_or(0) > 0 {
            tracing::warn!(artifact_id = %id, "lineage cycle, using shortest distance for level");
            level.insert(id.clone(), dist);
        }
    }
    for target in targets {
        level.remove(target);
    }
    level
}

impl Vault {
    /// Build a level-ordered plan for `targets`.
    pub fn plan_rebuild<P: AsRef<Path>>(&self, targets: &[P], depth: Depth, mode: PlanMode) -> VaultResult<RebuildPlan> {
        let catalog = self.catalog.read()?;
        let graph = self.child_graph(&catalog);

        let target_paths: BTreeMap<String, PathBuf> = targets
            .iter()
            .map(|t| {
                let canonical = self.canonical(t);
                (artifact_id(&canonical), canonical)
            })
            .collect();
        let target_ids: BTreeSet<String> = target_paths.keys().cloned().collect();
        let shortest = reachable(&graph, &target_ids, depth);

        let mut entries = match mode {
            PlanMode::Propagate => longest_levels(&graph, &target_ids, &shortest)
                .into_iter()
                .filter_map(|(id, level)| {
                    let record = catalog.artifact(&id)?;
                    Some(PlanEntry {
                        level,
                        path: record.canonical_path.clone(),
                        reason: PlanReason::UpstreamChanged,
                        prior_version: Some(record.latest_version_id.clone()),
                    })
                })
                .collect::<Vec<_>>(),
            PlanMode::Strict => self.strict_entries(&catalog, &target_paths, &graph, &target_ids, &shortest)?,
        };

        entries.sort_by(|a, b| (a.level, &a.path).cmp(&(b.level, &b.path)));
        tracing::debug!(%mode, %depth, entries = entries.len(), "rebuild plan computed");
        Ok(RebuildPlan { mode, entries })
    }

    fn strict_entries(
        &self,
        catalog: &Catalog,
        target_paths: &BTreeMap<String, PathBuf>,
        graph: &ChildGraph,
        target_ids: &BTreeSet<String>,
        shortest: &BTreeMap<String, usize>,
    ) -> VaultResult<Vec<PlanEntry>> {
        let levels = longest_levels(graph, target_ids, shortest);
        let mut candidates: Vec<(usize, PathBuf)> = target_paths.values().map(|p| (0, p.clone())).collect();
        for (id, level) in levels {
            if let Some(record) = catalog.artifact(&id) {
                candidates.push((level, record.canonical_path.clone()));
            }
        }

        let mut entries = Vec::new();
        for (level, path) in candidates {
            let Some(reason) = self.strict_reason(catalog, &path)? else {
                continue;
            };
            let prior_version = catalog
                .artifact(&artifact_id(&path))
                .map(|a| a.latest_version_id.clone());
            entries.push(PlanEntry {
                level,
                path,
                reason,
                prior_version,
            });
        }
        Ok(entries)
    }
}
