//! Cross-process locking for the artifact catalog
//!
//! Every catalog mutation runs inside [`with_lock`]. Two implementations of
//! [`CatalogLock`] are provided:
//! - [`FileLock`]: an OS-level exclusive `flock` (unix only)
//! - [`MarkerLock`]: a create-new marker file, a strictly weaker advisory
//!   guarantee used when no OS lock is available
//!
//! Callers can inspect [`CatalogLock::strength`] and refuse the advisory mode
//! in production. Locks are released when the [`LockGuard`] is dropped, which
//! covers early returns, errors and unwinding.

mod file_lock;
mod marker;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;

pub use file_lock::FileLock;
pub use marker::MarkerLock;

/// Lock result type
pub type LockResult<T> = Result<T, LockError>;

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock {}", resource.display())]
    Timeout { resource: PathBuf, waited: Duration },

    #[error("I/O error on lock {}: {source}", resource.display())]
    Io {
        resource: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("exclusive OS file locks are not supported on this platform (lock {})", resource.display())]
    Unsupported { resource: PathBuf },
}

/// Guarantee offered by a lock implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrength {
    /// OS-enforced exclusion; released by the kernel if the holder dies.
    Exclusive,
    /// Cooperative marker file; a crashed holder leaves the marker behind.
    Advisory,
}

impl fmt::Display for LockStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockStrength::Exclusive => f.write_str("exclusive"),
            LockStrength::Advisory => f.write_str("advisory"),
        }
    }
}

/// A named, cross-process lock around catalog mutation.
pub trait CatalogLock: fmt::Debug + Send + Sync {
    /// Block until the lock is held or `timeout` elapses.
    fn acquire(&self, timeout: Duration) -> LockResult<LockGuard>;

    /// Strength of the exclusion this implementation provides.
    fn strength(&self) -> LockStrength;

    /// Path of the file backing the lock.
    fn resource(&self) -> &Path;
}

/// Held lock. Dropping it releases the lock.
pub struct LockGuard {
    resource: PathBuf,
    _held: Box<dyn Send>,
}

impl LockGuard {
    pub(crate) fn new(resource: PathBuf, held: Box<dyn Send>) -> Self {
        Self {
            resource,
            _held: held,
        }
    }

    /// Path of the lock file this guard holds.
    pub fn resource(&self) -> &Path {
        &self.resource
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("resource", &self.resource)
            .finish()
    }
}

/// Run `critical` while holding `lock`.
///
/// Fails with [`LockError::Timeout`] (converted into the caller's error type)
/// if the lock is not acquired in time; the closure is not run in that case.
pub fn with_lock<L, T, E, F>(lock: &L, timeout: Duration, critical: F) -> Result<T, E>
where
    L: CatalogLock + ?Sized,
    E: From<LockError>,
    F: FnOnce() -> Result<T, E>,
{
    let guard = lock.acquire(timeout)?;
    let result = critical();
    drop(guard);
    result
}

/// Poll `try_once` until it yields a held lock or `timeout` elapses.
///
/// `try_once` returns `Ok(None)` while the lock is held elsewhere.
pub(crate) fn poll_until<T, F>(resource: &Path, timeout: Duration, mut try_once: F) -> LockResult<T>
where
    F: FnMut() -> io::Result<Option<T>>,
{
    const POLL_INTERVAL: Duration = Duration::from_millis(20);
    const CONTENTION_WARNING: Duration = Duration::from_millis(500);

    let start = Instant::now();
    let mut warned = false;

    loop {
        match try_once() {
            Ok(Some(held)) => {
                if warned {
                    tracing::info!(
                        resource = %resource.display(),
                        waited_ms = start.elapsed().as_millis() as u64,
                        "lock acquired after contention"
                    );
                }
                return Ok(held);
            }
            Ok(None) => {
                if !warned && start.elapsed() > CONTENTION_WARNING {
                    tracing::warn!(resource = %resource.display(), "lock contention, waiting");
                    warned = true;
                }
            }
            Err(source) => {
                return Err(LockError::Io {
                    resource: resource.to_path_buf(),
                    source,
                })
            }
        }

        let waited = start.elapsed();
        if waited >= timeout {
            return Err(LockError::Timeout {
                resource: resource.to_path_buf(),
                waited,
            });
        }

        std::thread::sleep(POLL_INTERVAL.min(timeout.saturating_sub(waited)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_with_lock_runs_closure_and_releases() {
        let dir = TempDir::new().unwrap();
        let lock = MarkerLock::new(dir.path().join("catalog.lock.marker"));

        let value: Result<u32, LockError> =
            with_lock(&lock, Duration::from_millis(100), || Ok(7));
        assert_eq!(value.unwrap(), 7);

        // Released: can be taken again immediately
        let _guard = lock.acquire(Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn test_with_lock_releases_on_error() {
        let dir = TempDir::new().unwrap();
        let lock = MarkerLock::new(dir.path().join("catalog.lock.marker"));

        let result: Result<(), LockError> = with_lock(&lock, Duration::from_millis(100), || {
            Err(LockError::Unsupported {
                resource: PathBuf::from("catalog.lock"),
            })
        });
        assert!(matches!(result, Err(LockError::Unsupported { .. })));

        assert!(lock.acquire(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_with_lock_timeout_skips_closure() {
        let dir = TempDir::new().unwrap();
        let lock = MarkerLock::new(dir.path().join("catalog.lock.marker"));
        let _held = lock.acquire(Duration::from_millis(10)).unwrap();

        let mut ran = false;
        let result: Result<(), LockError> = with_lock(&lock, Duration::from_millis(50), || {
            ran = true;
            Ok(())
        });

        assert!(matches!(result, Err(LockError::Timeout { .. })));
        assert!(!ran);
    }

    #[test]
    fn test_strength_display() {
        assert_eq!(LockStrength::Exclusive.to_string(), "exclusive");
        assert_eq!(LockStrength::Advisory.to_string(), "advisory");
    }
}
