//! Integration tests: concurrent writers and catalog locking

mod fixtures;

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use artifact_vault::version::is_staging_name;
use artifact_vault::{LockMode, LockStrength, SaveRequest, Vault, VaultError, VaultOptions};
use fixtures::{version_count, TestVault};
use tempfile::TempDir;

const WRITERS: usize = 4;
const SAVES: usize = 5;

// === Concurrent writers ===

#[test]
fn test_concurrent_writers_lose_no_versions() {
    let dir = TempDir::new().unwrap();

    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let root = dir.path().to_path_buf();
            thread::spawn(move || {
                let vault = Vault::open_with(&root, VaultOptions::default()).expect("open vault");
                for i in 0..SAVES {
                    vault
                        .save(SaveRequest::new(format!("writer-{w}.txt"), format!("{w}:{i}")))
                        .expect("save own artifact");
                    vault
                        .save(SaveRequest::new("shared.txt", format!("shared {w}:{i}")))
                        .expect("save shared artifact");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let vault = Vault::open_with(dir.path(), VaultOptions::default()).unwrap();
    for w in 0..WRITERS {
        assert_eq!(version_count(&vault, &format!("writer-{w}.txt")), SAVES);
    }
    assert_eq!(version_count(&vault, "shared.txt"), WRITERS * SAVES);

    let catalog = vault.read_catalog().unwrap();
    assert_eq!(catalog.versions.len(), WRITERS * SAVES * 2);
    let ids: HashSet<_> = catalog.versions.iter().map(|v| v.version_id.as_str()).collect();
    assert_eq!(ids.len(), catalog.versions.len());

    // latest is the most recent row
    let shared = catalog.artifact_by_path(&vault.canonical("shared.txt")).unwrap();
    let newest = catalog
        .versions_of(&shared.artifact_id)
        .last()
        .map(|v| v.version_id.clone());
    assert_eq!(Some(shared.latest_version_id.clone()), newest);

    for w in 0..WRITERS {
        assert_snapshots_verify(&vault, &format!("writer-{w}.txt"));
    }
    assert_snapshots_verify(&vault, "shared.txt");
}

#[test]
fn test_contended_artifact_snapshots_match_their_versions() {
    const HEAVY_WRITERS: usize = 8;
    const HEAVY_SAVES: usize = 20;
    let dir = TempDir::new().unwrap();

    let handles: Vec<_> = (0..HEAVY_WRITERS)
        .map(|w| {
            let root = dir.path().to_path_buf();
            thread::spawn(move || {
                let vault = Vault::open_with(&root, VaultOptions::default()).expect("open vault");
                for i in 0..HEAVY_SAVES {
                    vault
                        .save(SaveRequest::new("hot.txt", format!("writer {w} save {i}")))
                        .expect("save contended artifact");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let vault = Vault::open_with(dir.path(), VaultOptions::default()).unwrap();
    assert_eq!(version_count(&vault, "hot.txt"), HEAVY_WRITERS * HEAVY_SAVES);
    assert_snapshots_verify(&vault, "hot.txt");
}

/// Every snapshot of `rel` holds the bytes its version row describes.
fn assert_snapshots_verify(vault: &Vault, rel: &str) {
    let report = vault.verify(rel).unwrap();
    let bad: Vec<_> = report
        .versions
        .iter()
        .filter(|v| !v.integrity.is_ok())
        .map(|v| v.version_id.clone())
        .collect();
    assert!(bad.is_empty(), "{rel}: snapshots not matching their version: {bad:?}");
}

fn snapshot_dirs(vault: &Vault, rel: &str) -> usize {
    let canonical = vault.canonical(rel);
    let dir = vault
        .snapshot_store()
        .artifact_dir(&canonical, &vault.artifact_id(rel));
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| !is_staging_name(&e.file_name().to_string_lossy()))
                .count()
        })
        .unwrap_or(0)
}

#[test]
fn test_two_vaults_see_each_others_versions() {
    let tv = TestVault::new();
    let other = tv.reopen();

    tv.save_text("a.txt", "one");
    other.save(SaveRequest::new("a.txt", "two")).unwrap();

    assert_eq!(version_count(&tv.vault, "a.txt"), 2);
    assert_eq!(tv.vault.load("a.txt").unwrap().as_text(), Some("two"));
}

// === Locking ===

#[cfg(unix)]
#[test]
fn test_exclusive_lock_by_default() {
    let tv = TestVault::new();
    assert_eq!(tv.vault.lock_strength(), LockStrength::Exclusive);
}

#[test]
fn test_advisory_mode_uses_marker() {
    let tv = TestVault::with_options(VaultOptions::default().with_lock_mode(LockMode::Advisory));
    assert_eq!(tv.vault.lock_strength(), LockStrength::Advisory);

    tv.save_text("a.txt", "x");
    assert_eq!(version_count(&tv.vault, "a.txt"), 1);
}

#[test]
fn test_require_exclusive_refuses_advisory() {
    let dir = TempDir::new().unwrap();
    let mut options = VaultOptions::default().with_lock_mode(LockMode::Advisory);
    options.lock.require_exclusive = true;

    let err = Vault::open_with(dir.path(), options).unwrap_err();
    assert!(matches!(err, VaultError::WeakLock { .. }));
}

#[test]
fn test_held_lock_times_out() {
    let tv = TestVault::new();
    tv.save_text("a.txt", "x");

    let impatient = Vault::open_with(
        tv.dir.path(),
        VaultOptions::default().with_lock_timeout(Duration::from_millis(100)),
    )
    .unwrap();

    let guard = tv
        .vault
        .catalog_store()
        .lock()
        .acquire(Duration::from_secs(1))
        .unwrap();
    let err = impatient.reindex().unwrap_err();
    assert!(matches!(err, VaultError::LockTimeout { .. }));
    assert!(err.is_retryable());

    drop(guard);
    assert!(impatient.reindex().is_ok());
}

#[test]
fn test_save_timing_out_on_lock_leaves_no_snapshot() {
    let tv = TestVault::new();
    tv.save_text("a.txt", "one");

    let impatient = Vault::open_with(
        tv.dir.path(),
        VaultOptions::default().with_lock_timeout(Duration::from_millis(50)),
    )
    .unwrap();

    let guard = tv
        .vault
        .catalog_store()
        .lock()
        .acquire(Duration::from_secs(1))
        .unwrap();
    let err = impatient.save(SaveRequest::new("a.txt", "two")).unwrap_err();
    assert!(matches!(err, VaultError::LockTimeout { .. }));
    assert_eq!(snapshot_dirs(&impatient, "a.txt"), 1);
    assert_eq!(version_count(&impatient, "a.txt"), 1);
    drop(guard);

    // The retry is a clean save
    let retried = impatient.save(SaveRequest::new("a.txt", "two")).unwrap();
    assert!(retried.versioned());
    assert_eq!(snapshot_dirs(&impatient, "a.txt"), 2);
    assert_eq!(version_count(&impatient, "a.txt"), 2);
    assert_snapshots_verify(&impatient, "a.txt");
}
