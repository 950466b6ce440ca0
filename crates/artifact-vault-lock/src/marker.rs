//! Advisory marker-file lock
//!
//! Holding the lock means having created the marker with `create_new`.
//! Nothing stops a process that ignores the marker, and a crashed holder
//! leaves it behind; markers older than the stale threshold are reclaimed.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::{poll_until, CatalogLock, LockGuard, LockResult, LockStrength};

/// Default age after which a marker is considered abandoned.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(600);

/// Best-effort lock based on the existence of a marker file.
#[derive(Debug, Clone)]
pub struct MarkerLock {
    path: PathBuf,
    stale_after: Duration,
}

impl MarkerLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Override the abandoned-marker threshold.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    fn try_create(&self) -> io::Result<Option<HeldMarker>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(mut file) => {
                writeln!(file, "pid={}", std::process::id())?;
                Ok(Some(HeldMarker {
                    path: self.path.clone(),
                }))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if self.is_abandoned() {
                    tracing::warn!(
                        marker = %self.path.display(),
                        stale_after_secs = self.stale_after.as_secs(),
                        "reclaiming abandoned lock marker"
                    );
                    match fs::remove_file(&self.path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn is_abandoned(&self) -> bool {
        let modified = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return false,
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age >= self.stale_after)
            .unwrap_or(false)
    }
}

impl CatalogLock for MarkerLock {
    fn acquire(&self, timeout: Duration) -> LockResult<LockGuard> {
        let held = poll_until(&self.path, timeout, || self.try_create())?;
        Ok(LockGuard::new(self.path.clone(), Box::new(held)))
    }

    fn strength(&self) -> LockStrength {
        LockStrength::Advisory
    }

    fn resource(&self) -> &Path {
        &self.path
    }
}

/// Removes the marker on drop.
struct HeldMarker {
    path: PathBuf,
}

impl Drop for HeldMarker {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(marker = %self.path.display(), error = %e, "failed to remove lock marker");
        }
    }
}
