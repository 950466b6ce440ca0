//! OS-level exclusive lock backed by `flock(2)`

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{poll_until, CatalogLock, LockError, LockGuard, LockResult, LockStrength};

/// Exclusive lock on a file, held for the lifetime of the guard.
///
/// Each acquisition opens its own file description, so two handles in the
/// same process contend just like two processes do.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Create a lock on `path`.
    ///
    /// Fails with [`LockError::Unsupported`] where `flock` is unavailable.
    pub fn new(path: impl Into<PathBuf>) -> LockResult<Self> {
        let path = path.into();
        if cfg!(unix) {
            Ok(Self { path })
        } else {
            Err(LockError::Unsupported { resource: path })
        }
    }

    fn open(&self) -> io::Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
    }
}

impl CatalogLock for FileLock {
    fn acquire(&self, timeout: Duration) -> LockResult<LockGuard> {
        let file = self.open().map_err(|source| LockError::Io {
            resource: self.path.clone(),
            source,
        })?;

        poll_until(&self.path, timeout, || try_lock_exclusive(&file))?;

        Ok(LockGuard::new(self.path.clone(), Box::new(HeldFile { file })))
    }

    fn strength(&self) -> LockStrength {
        LockStrength::Exclusive
    }

    fn resource(&self) -> &Path {
        &self.path
    }
}

/// Keeps the locked descriptor open; unlocks on drop.
struct HeldFile {
    file: File,
}

impl Drop for HeldFile {
    fn drop(&mut self) {
        unlock(&self.file);
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<Option<()>> {
    use std::os::unix::io::AsRawFd;

    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(Some(()));
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(None)
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<Option<()>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "flock is not available on this platform",
    ))
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_creates_lock_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("catalog.lock");
        let lock = FileLock::new(&path).unwrap();

        let guard = lock.acquire(Duration::from_secs(1)).unwrap();

        assert!(path.exists());
        assert_eq!(guard.resource(), path.as_path());
        assert_eq!(lock.strength(), LockStrength::Exclusive);
    }

    #[test]
    fn test_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let lock = FileLock::new(dir.path().join("catalog.lock")).unwrap();

        {
            let _guard = lock.acquire(Duration::from_secs(1)).unwrap();
        }

        let _again = lock.acquire(Duration::from_millis(50)).unwrap();
    }

    #[test]
    fn test_contention_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.lock");
        let lock = FileLock::new(&path).unwrap();
        let held = lock.acquire(Duration::from_secs(1)).unwrap();

        let (tx, rx) = mpsc::channel();
        let contender = FileLock::new(&path).unwrap();
        let handle = thread::spawn(move || {
            let result = contender.acquire(Duration::from_millis(100));
            tx.send(matches!(result, Err(LockError::Timeout { .. }))).unwrap();
        });

        assert!(rx.recv().unwrap(), "second acquisition should time out");
        handle.join().unwrap();
        drop(held);
    }

    #[test]
    fn test_waiter_proceeds_after_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.lock");
        let lock = FileLock::new(&path).unwrap();
        let held = lock.acquire(Duration::from_secs(1)).unwrap();

        let contender = FileLock::new(&path).unwrap();
        let handle = thread::spawn(move || contender.acquire(Duration::from_secs(5)).is_ok());

        thread::sleep(Duration::from_millis(100));
        drop(held);

        assert!(handle.join().unwrap());
    }
}
