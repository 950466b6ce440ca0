//! Immutable snapshot directories
//!
//! Layout under `<state>/versions/`:
//! - artifacts under the managed root mirror their relative path:
//!   `versions/data/clean.json/<version_id>/`
//! - anything else lands in a hash bucket:
//!   `versions/_external/<artifact_id[..12]>-<basename>/<version_id>/`
//!
//! A snapshot holds `artifact`, one `sidecar.<ext>` per configured format and,
//! when the version declared parents, `parents.json`. Snapshots are staged in
//! a hidden sibling directory and renamed into place.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::SidecarFormat;
use crate::error::{IoResultExt, VaultError, VaultResult};
use crate::fsutil::{dir_size, staging_path};
use crate::identity::{relative_to_root, SHORT_ID_LEN};

use super::manifest::{ParentsManifest, MANIFEST_FILE};

/// Artifact byte copy inside a snapshot.
pub const ARTIFACT_FILE: &str = "artifact";

/// Bucket for artifacts outside the managed root.
pub const EXTERNAL_DIR: &str = "_external";

const STAGING_TAG: &str = "stage";

/// True for the hidden directories used while staging a commit.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(&format!(".{STAGING_TAG}."))
}

/// Sidecar file name inside a snapshot.
pub fn sidecar_file(format: SidecarFormat) -> String {
    format!("sidecar.{}", format.extension())
}

/// What goes into a new snapshot. Everything is taken from memory, never
/// from the live files, which a concurrent writer may already have replaced.
#[derive(Debug, Clone)]
pub struct SnapshotContents<'a> {
    /// Artifact bytes as written by this save
    pub artifact: &'a [u8],
    /// Encoded sidecars, one per format
    pub sidecars: &'a [(SidecarFormat, Vec<u8>)],
    pub manifest: Option<&'a ParentsManifest>,
}

/// Snapshot tree rooted at `<state>/versions`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    versions_root: PathBuf,
    managed_root: PathBuf,
}

impl SnapshotStore {
    pub fn new(versions_root: impl Into<PathBuf>, managed_root: impl Into<PathBuf>) -> Self {
        Self {
            versions_root: versions_root.into(),
            managed_root: managed_root.into(),
        }
    }

    pub fn versions_root(&self) -> &Path {
        &self.versions_root
    }

    /// Directory holding every snapshot of one artifact.
    pub fn artifact_dir(&self, canonical: &Path, artifact_id: &str) -> PathBuf {
        match relative_to_root(canonical, &self.managed_root) {
            Some(relative) if relative.components().next().is_some() => self.versions_root.join(relative),
            _ => {
                let basename = canonical
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "artifact".to_string());
                let prefix = &artifact_id[..SHORT_ID_LEN.min(artifact_id.len())];
                self.versions_root
                    .join(EXTERNAL_DIR)
                    .join(format!("{prefix}-{basename}"))
            }
        }
    }

    pub fn snapshot_dir(&self, canonical: &Path, artifact_id: &str, version_id: &str) -> PathBuf {
        self.artifact_dir(canonical, artifact_id).join(version_id)
    }

    /// Write `contents` into `dir`. Returns `true` if this call created the
    /// snapshot.
    ///
    /// If `dir` already exists another process committed the same version id
    /// first; the staged copy is discarded, the existing snapshot kept and
    /// `false` returned.
    pub fn commit(&self, dir: &Path, version_id: &str, contents: SnapshotContents<'_>) -> VaultResult<bool> {
        let stage = staging_path(dir, STAGING_TAG);
        let fail = |source: io::Error| VaultError::SnapshotCommitFailed {
            dir: dir.to_path_buf(),
            version_id: version_id.to_string(),
            source,
        };

        if let Err(e) = stage_contents(&stage, &contents) {
            let _ = fs::remove_dir_all(&stage);
            return Err(fail(e));
        }

        if dir.exists() {
            tracing::debug!(snapshot = %dir.display(), "snapshot already committed, keeping existing");
            let _ = fs::remove_dir_all(&stage);
            return Ok(false);
        }

        match fs::rename(&stage, dir) {
            Ok(()) => {
                tracing::debug!(snapshot = %dir.display(), %version_id, "snapshot committed");
                Ok(true)
            }
            Err(_) if dir.exists() => {
                let _ = fs::remove_dir_all(&stage);
                Ok(false)
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&stage);
                Err(fail(e))
            }
        }
    }

    /// Bytes of the artifact copy in a snapshot.
    pub fn load_bytes(&self, dir: &Path) -> VaultResult<Vec<u8>> {
        let path = dir.join(ARTIFACT_FILE);
        fs::read(&path).at(path)
    }

    pub fn exists(&self, dir: &Path) -> bool {
        dir.join(ARTIFACT_FILE).is_file()
    }

    /// Delete a snapshot, returning the bytes reclaimed. A missing snapshot
    /// counts as removed. Empty artifact directories are cleaned up.
    pub fn remove(&self, dir: &Path) -> VaultResult<u64> {
        let size = dir_size(dir);
        match fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(VaultError::io(dir, e)),
        }

        let mut parent = dir.parent();
        while let Some(p) = parent {
            if p == self.versions_root || !p.starts_with(&self.versions_root) {
                break;
            }
            // Stops at the first non-empty directory
            if fs::remove_dir(p).is_err() {
                break;
            }
            parent = p.parent();
        }
        Ok(size)
    }
}

fn stage_contents(stage: &Path, contents: &SnapshotContents<'_>) -> io::Result<()> {
    fs::create_dir_all(stage)?;
    fs::write(stage.join(ARTIFACT_FILE), contents.artifact)?;
    for (format, sidecar) in contents.sidecars {
        fs::write(stage.join(sidecar_file(*format)), sidecar)?;
    }
    if let Some(manifest) = contents.manifest {
        let bytes = manifest
            .to_bytes()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        fs::write(stage.join(MANIFEST_FILE), bytes)?;
    }
    if let Some(parent) = stage.parent() {
        fs::File::open(parent).and_then(|d| d.sync_all()).ok();
    }
    Ok(())
}
