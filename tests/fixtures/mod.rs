//! Shared vault fixtures for integration tests
//!
//! Each fixture owns a temporary managed root and a manual clock, so version
//! timestamps are deterministic and retention windows can be crossed by
//! advancing time.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use artifact_vault::{ManualClock, RetentionPolicy, SaveOutcome, SaveRequest, Vault, VaultOptions};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

pub struct TestVault {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub vault: Vault,
}

impl TestVault {
    pub fn new() -> Self {
        Self::with_options(VaultOptions::default())
    }

    pub fn with_retention(policy: RetentionPolicy) -> Self {
        Self::with_options(VaultOptions::default().with_retention(policy))
    }

    pub fn with_options(options: VaultOptions) -> Self {
        let dir = TempDir::new().expect("create temp root");
        let clock = Arc::new(ManualClock::new(start_time()));
        let vault = Vault::open_with(dir.path(), options)
            .expect("open vault")
            .with_clock(clock.clone());
        Self { dir, clock, vault }
    }

    /// A second, independent vault over the same root.
    pub fn reopen(&self) -> Vault {
        Vault::open_with(self.dir.path(), self.vault.options().clone())
            .expect("reopen vault")
            .with_clock(self.clock.clone())
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn save_text(&self, rel: &str, text: &str) -> SaveOutcome {
        self.vault
            .save(SaveRequest::new(rel, text))
            .expect("save text artifact")
    }

    pub fn days(&self, days: i64) {
        self.clock.advance(chrono::Duration::days(days));
    }
}

pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn version_count(vault: &Vault, rel: &str) -> usize {
    vault.artifact(rel).map(|a| a.version_count).unwrap_or(0)
}
