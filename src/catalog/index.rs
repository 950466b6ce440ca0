//! Reverse-lineage index: parent artifact id -> child versions naming it
//!
//! Only an accelerator. `covers_versions` records how many version rows the
//! index reflects. Once that disagrees with the catalog the index is marked
//! `stale` and stays stale until a reindex replaces it; readers of a stale
//! index fall back to scanning committed manifests.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A child version that declared a parent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChildRef {
    pub child_artifact_id: String,
    pub child_version_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentsIndex {
    pub covers_versions: usize,
    /// Set when a catalog change was not applied to the index
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
    pub entries: BTreeMap<String, Vec<ChildRef>>,
}

impl ParentsIndex {
    /// Register one new child version under each of its parents.
    pub fn add_version(&mut self, parent_ids: &[String], child: &ChildRef) {
        let unique: BTreeSet<&String> = parent_ids.iter().collect();
        for parent_id in unique {
            let children = self.entries.entry(parent_id.clone()).or_default();
            if !children.contains(child) {
                children.push(child.clone());
            }
        }
        self.covers_versions += 1;
    }

    /// Forget removed child versions.
    pub fn remove_child_versions(&mut self, child_artifact_id: &str, version_ids: &BTreeSet<String>) {
        for children in self.entries.values_mut() {
            children.retain(|c| {
                !(c.child_artifact_id == child_artifact_id && version_ids.contains(&c.child_version_id))
            });
        }
        self.entries.retain(|_, children| !children.is_empty());
        self.covers_versions = self.covers_versions.saturating_sub(version_ids.len());
    }

    pub fn children_of(&self, parent_id: &str) -> &[ChildRef] {
        self.entries.get(parent_id).map(Vec::as_slice).unwrap_or(&[])
    }
}
