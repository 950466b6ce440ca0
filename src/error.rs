//! Error taxonomy for vault operations

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use artifact_vault_lock::LockError;
use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors surfaced by the vault.
///
/// Validation errors are raised before any I/O. I/O and lock errors are
/// returned as-is; retrying is the caller's decision.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The durable catalog exists but cannot be parsed. Recovery is manual:
    /// delete the catalog file and the next save recreates it.
    #[error("catalog {} is corrupt: {reason} (delete it to let the next save recreate it)", path.display())]
    CatalogCorrupt { path: PathBuf, reason: String },

    #[error("timed out after {waited:?} waiting for catalog lock {}", resource.display())]
    LockTimeout { resource: PathBuf, waited: Duration },

    #[error("catalog lock {} failed: {reason}", resource.display())]
    Lock { resource: PathBuf, reason: String },

    #[error("refusing advisory catalog lock at {}: an exclusive OS lock is required", resource.display())]
    WeakLock { resource: PathBuf },

    #[error("failed to commit snapshot {version_id} into {}: {source}", dir.display())]
    SnapshotCommitFailed {
        dir: PathBuf,
        version_id: String,
        #[source]
        source: io::Error,
    },

    #[error("no builder registered for {}", path.display())]
    NoBuilderRegistered { path: PathBuf },

    #[error("builder for {} failed: {message}", path.display())]
    BuilderFailed { path: PathBuf, message: String },

    #[error("parent {} does not resolve to an existing version{}", path.display(), version_id.as_deref().map(|v| format!(" ({v})")).unwrap_or_default())]
    MissingParentVersion {
        path: PathBuf,
        version_id: Option<String>,
    },

    #[error("artifact not tracked: {}", path.display())]
    ArtifactNotFound { path: PathBuf },

    #[error("version {version_id} not found for {}", path.display())]
    VersionNotFound { path: PathBuf, version_id: String },

    #[error("codec {format}: {message}")]
    Codec { format: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VaultError {
    /// Attach a path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        VaultError::Io {
            path: path.into(),
            source,
        }
    }

    /// True when retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::LockTimeout { .. })
    }
}

impl From<LockError> for VaultError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { resource, waited } => VaultError::LockTimeout { resource, waited },
            LockError::Io { resource, source } => VaultError::Lock {
                resource,
                reason: source.to_string(),
            },
            LockError::Unsupported { resource } => VaultError::Lock {
                resource,
                reason: "exclusive locks unsupported on this platform".to_string(),
            },
        }
    }
}

/// Extension for attaching paths to `io::Result`s.
pub(crate) trait IoResultExt<T> {
    fn at(self, path: impl Into<PathBuf>) -> VaultResult<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> VaultResult<T> {
        self.map_err(|e| VaultError::io(path, e))
    }
}
