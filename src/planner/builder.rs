//! Builder registry
//!
//! Builders are pure functions from a target and its parents' current data to
//! new content. Registrations live only as long as the vault that holds them.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::ArtifactData;
use crate::vault::Vault;

pub type BuildError = Box<dyn Error + Send + Sync>;

/// Signature of a builder function.
pub type BuildFn = dyn Fn(&BuildContext) -> Result<BuildOutput, BuildError> + Send + Sync;

/// A parent as handed to a builder: its latest version and decoded data.
#[derive(Debug, Clone)]
pub struct BuildInput {
    pub path: PathBuf,
    pub version_id: String,
    pub data: ArtifactData,
}

#[derive(Debug, Clone)]
pub struct BuildContext {
    pub target: PathBuf,
    pub parents: Vec<BuildInput>,
}

impl BuildContext {
    /// Data of the parent at `path`, if it is one.
    pub fn parent(&self, path: &Path) -> Option<&ArtifactData> {
        self.parents.iter().find(|p| p.path == path).map(|p| &p.data)
    }
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub data: ArtifactData,
    /// Producing code identity; defaults to the registration's
    pub code: Option<String>,
    /// Stored as the `label` sidecar attribute
    pub label: Option<String>,
}

impl BuildOutput {
    pub fn new(data: impl Into<ArtifactData>) -> Self {
        Self {
            data: data.into(),
            code: None,
            label: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Clone)]
pub(crate) struct Registration {
    pub builder: Arc<BuildFn>,
    /// Code identity compared against the latest version's code hash
    pub code: Option<String>,
}

/// Target path to builder; the last registration for a path wins.
#[derive(Clone, Default)]
pub struct BuilderRegistry {
    entries: BTreeMap<PathBuf, Registration>,
}

impl fmt::Debug for BuilderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderRegistry")
            .field("targets", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BuilderRegistry {
    pub(crate) fn insert(&mut self, target: PathBuf, registration: Registration) {
        if self.entries.insert(target.clone(), registration).is_some() {
            tracing::debug!(target = %target.display(), "builder replaced");
        }
    }

    pub(crate) fn get(&self, target: &Path) -> Option<&Registration> {
        self.entries.get(target)
    }

    pub fn contains(&self, target: &Path) -> bool {
        self.entries.contains_key(target)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Vault {
    /// Register `builder` for `target`, replacing any earlier registration.
    pub fn register_builder<F>(&mut self, target: impl AsRef<Path>, builder: F)
    where
        F: Fn(&BuildContext) -> Result<BuildOutput, BuildError> + Send + Sync + 'static,
    {
        self.register_builder_with_code(target, None::<String>, builder);
    }

    /// Register a builder together with the identity of its code, so strict
    /// staleness can flag versions produced by different code.
    pub fn register_builder_with_code<F>(&mut self, target: impl AsRef<Path>, code: Option<impl Into<String>>, builder: F)
    where
        F: Fn(&BuildContext) -> Result<BuildOutput, BuildError> + Send + Sync + 'static,
    {
        let target = self.canonical(target);
        self.builders.insert(
            target,
            Registration {
                builder: Arc::new(builder),
                code: code.map(Into::into),
            },
        );
    }

    pub fn clear_builders(&mut self) {
        self.builders.clear();
    }

    pub fn builders(&self) -> &BuilderRegistry {
        &self.builders
    }
}
