//! Vault context
//!
//! Everything an operation needs travels through a [`Vault`]: the managed
//! root, typed options, codecs, hasher, clock, catalog lock and the builder
//! registry. Several vaults can coexist in one process.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use artifact_vault_lock::{CatalogLock, FileLock, LockError, LockStrength, MarkerLock};

use crate::catalog::{ArtifactRecord, Catalog, CatalogStore};
use crate::clock::{Clock, SystemClock};
use crate::codec::{Codec, CodecRegistry};
use crate::config::{user_config_path, EffectiveConfig, LockMode, LockOptions, VaultOptions};
use crate::error::{IoResultExt, VaultError, VaultResult};
use crate::hash::{ContentHasher, Sha256Hasher};
use crate::identity::{artifact_id, canonicalize, normalize};
use crate::planner::BuilderRegistry;
use crate::version::SnapshotStore;

pub const CATALOG_FILE: &str = "catalog.json";
pub const LOCK_FILE: &str = "catalog.lock";
pub const MARKER_FILE: &str = "catalog.lock.marker";
pub const VERSIONS_DIR: &str = "versions";

/// A managed root and its state directory.
#[derive(Debug)]
pub struct Vault {
    pub(crate) root: PathBuf,
    pub(crate) state_dir: PathBuf,
    pub(crate) options: VaultOptions,
    pub(crate) codecs: CodecRegistry,
    pub(crate) hasher: Arc<dyn ContentHasher>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) catalog: CatalogStore,
    pub(crate) snapshots: SnapshotStore,
    pub(crate) builders: BuilderRegistry,
}

impl Vault {
    /// Open `root` with options from the user config file and the project
    /// file in the state directory.
    pub fn open(root: impl AsRef<Path>) -> VaultResult<Self> {
        let root = absolute_root(root.as_ref())?;
        let user = user_config_path();
        let effective = EffectiveConfig::for_root(&root, user.as_deref(), None)?;
        Self::open_with(root, effective.options()?)
    }

    /// Open `root` with explicit options; config files are not consulted.
    pub fn open_with(root: impl AsRef<Path>, options: VaultOptions) -> VaultResult<Self> {
        options.validate()?;
        let root = absolute_root(root.as_ref())?;
        let state_dir = root.join(&options.state_dir);
        fs::create_dir_all(&state_dir).at(&state_dir)?;

        let lock = select_lock(&state_dir, &options.lock)?;
        let catalog = CatalogStore::new(state_dir.join(CATALOG_FILE), lock, options.lock.timeout());
        let snapshots = SnapshotStore::new(state_dir.join(VERSIONS_DIR), &root);

        tracing::debug!(
            root = %root.display(),
            versioning = ?options.versioning,
            retention = %options.retention,
            "vault opened"
        );

        Ok(Self {
            root,
            state_dir,
            options,
            codecs: CodecRegistry::default(),
            hasher: Arc::new(Sha256Hasher),
            clock: Arc::new(SystemClock),
            catalog,
            snapshots,
            builders: BuilderRegistry::default(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Swap the catalog lock implementation.
    pub fn with_lock(mut self, lock: Arc<dyn CatalogLock>) -> Self {
        self.catalog = CatalogStore::new(self.catalog.path().to_path_buf(), lock, self.options.lock.timeout());
        self
    }

    pub fn register_codec(&mut self, codec: Arc<dyn Codec>) {
        self.codecs.register(codec);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn options(&self) -> &VaultOptions {
        &self.options
    }

    pub fn catalog_store(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn snapshot_store(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn lock_strength(&self) -> LockStrength {
        self.catalog.lock().strength()
    }

    /// Canonical form of `path`; relative paths are taken from the root.
    pub fn canonical(&self, path: impl AsRef<Path>) -> PathBuf {
        canonicalize(path.as_ref(), &self.root)
    }

    pub fn artifact_id(&self, path: impl AsRef<Path>) -> String {
        artifact_id(&self.canonical(path))
    }

    /// Lock-free catalog read.
    pub fn read_catalog(&self) -> VaultResult<Catalog> {
        self.catalog.read()
    }

    /// Catalog record for `path`, or `ArtifactNotFound`.
    pub fn artifact(&self, path: impl AsRef<Path>) -> VaultResult<ArtifactRecord> {
        let canonical = self.canonical(path);
        let id = artifact_id(&canonical);
        self.catalog
            .read()?
            .artifact(&id)
            .cloned()
            .ok_or(VaultError::ArtifactNotFound { path: canonical })
    }

    /// Snapshot directory of one version of `record`.
    pub(crate) fn snapshot_dir(&self, record: &ArtifactRecord, version_id: &str) -> PathBuf {
        self.snapshots
            .snapshot_dir(&record.canonical_path, &record.artifact_id, version_id)
    }
}

fn absolute_root(root: &Path) -> VaultResult<PathBuf> {
    if root.is_absolute() {
        return Ok(normalize(root));
    }
    let cwd = std::env::current_dir().at(root)?;
    Ok(canonicalize(root, &cwd))
}

/// Pick the catalog lock for `options`.
///
/// Without OS locking the marker lock is substituted with a warning, unless
/// `require_exclusive` is set.
fn select_lock(state_dir: &Path, options: &LockOptions) -> VaultResult<Arc<dyn CatalogLock>> {
    let marker = || -> Arc<dyn CatalogLock> {
        Arc::new(MarkerLock::new(state_dir.join(MARKER_FILE)).with_stale_after(options.stale_after()))
    };

    match options.mode {
        LockMode::Advisory if options.require_exclusive => Err(VaultError::WeakLock {
            resource: state_dir.join(MARKER_FILE),
        }),
        LockMode::Advisory => Ok(marker()),
        LockMode::Exclusive => match FileLock::new(state_dir.join(LOCK_FILE)) {
            Ok(lock) => Ok(Arc::new(lock)),
            Err(LockError::Unsupported { .. }) if options.require_exclusive => Err(VaultError::WeakLock {
                resource: state_dir.join(LOCK_FILE),
            }),
            Err(LockError::Unsupported { .. }) => {
                tracing::warn!(
                    state_dir = %state_dir.display(),
                    "exclusive OS locks unavailable, using advisory marker lock"
                );
                Ok(marker())
            }
            Err(e) => Err(e.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_state_dir() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::open_with(dir.path(), VaultOptions::default()).unwrap();

        assert!(dir.path().join(".vault").is_dir());
        assert_eq!(vault.state_dir(), dir.path().join(".vault"));
        assert!(vault.read_catalog().unwrap().artifacts.is_empty());
    }

    #[test]
    fn test_canonical_relative_to_root() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::open_with(dir.path(), VaultOptions::default()).unwrap();

        assert_eq!(vault.canonical("data/./a.json"), dir.path().join("data/a.json"));
        assert_eq!(vault.artifact_id("data/a.json"), vault.artifact_id(dir.path().join("data/a.json")));
    }

    #[test]
    fn test_advisory_mode_uses_marker() {
        let dir = TempDir::new().unwrap();
        let options = VaultOptions::default().with_lock_mode(LockMode::Advisory);

        let vault = Vault::open_with(dir.path(), options).unwrap();

        assert_eq!(vault.lock_strength(), LockStrength::Advisory);
    }

    #[test]
    fn test_require_exclusive_rejects_advisory() {
        let dir = TempDir::new().unwrap();
        let mut options = VaultOptions::default().with_lock_mode(LockMode::Advisory);
        options.lock.require_exclusive = true;

        let err = Vault::open_with(dir.path(), options).unwrap_err();

        assert!(matches!(err, VaultError::WeakLock { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_exclusive_by_default_on_unix() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::open_with(dir.path(), VaultOptions::default()).unwrap();
        assert_eq!(vault.lock_strength(), LockStrength::Exclusive);
    }

    #[test]
    fn test_open_reads_project_config() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".vault")).unwrap();
        fs::write(
            crate::config::project_config_path(dir.path(), ".vault"),
            "versioning = \"timestamp\"\nretention = 3\n",
        )
        .unwrap();

        let vault = Vault::open(dir.path()).unwrap();

        assert_eq!(vault.options().versioning, crate::config::VersioningMode::Timestamp);
        assert_eq!(vault.options().retention, crate::retention::RetentionPolicy::KeepLast(3));
    }

    #[test]
    fn test_invalid_options_rejected_before_open() {
        let dir = TempDir::new().unwrap();
        let options = VaultOptions::default().with_sidecar_formats(vec![]);

        assert!(matches!(
            Vault::open_with(dir.path(), options),
            Err(VaultError::Config(_))
        ));
        assert!(!dir.path().join(".vault").exists());
    }
}
