//! Typed vault options

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::retention::RetentionPolicy;

/// When a save creates a new version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersioningMode {
    /// Version only when content or producing code changed
    #[default]
    Content,
    /// Version on every save, changed or not
    Timestamp,
    /// Never version; only the live artifact and sidecar are updated
    Off,
}

/// Serialization of the sidecar document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SidecarFormat {
    Json,
    Toml,
}

impl SidecarFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SidecarFormat::Json => "json",
            SidecarFormat::Toml => "toml",
        }
    }
}

/// Requested catalog lock implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// OS `flock`; falls back to the marker lock where unavailable
    #[default]
    Exclusive,
    /// Marker file only
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarOptions {
    pub formats: Vec<SidecarFormat>,
}

impl Default for SidecarOptions {
    fn default() -> Self {
        Self {
            formats: vec![SidecarFormat::Json],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockOptions {
    /// How long a catalog mutation waits for the lock
    pub timeout_ms: u64,
    pub mode: LockMode,
    /// Refuse to run with the advisory marker lock
    pub require_exclusive: bool,
    /// Age after which an advisory marker is considered abandoned
    pub stale_marker_seconds: u64,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            mode: LockMode::Exclusive,
            require_exclusive: false,
            stale_marker_seconds: 600,
        }
    }
}

impl LockOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_marker_seconds)
    }
}

/// Options read by the vault at call time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultOptions {
    /// State directory name under the managed root
    pub state_dir: String,
    pub versioning: VersioningMode,
    pub retention: RetentionPolicy,
    pub sidecar: SidecarOptions,
    pub lock: LockOptions,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            state_dir: ".vault".to_string(),
            versioning: VersioningMode::Content,
            retention: RetentionPolicy::KeepAll,
            sidecar: SidecarOptions::default(),
            lock: LockOptions::default(),
        }
    }
}

impl VaultOptions {
    pub fn with_versioning(mut self, mode: VersioningMode) -> Self {
        self.versioning = mode;
        self
    }

    pub fn with_retention(mut self, policy: RetentionPolicy) -> Self {
        self.retention = policy;
        self
    }

    pub fn with_sidecar_formats(mut self, formats: Vec<SidecarFormat>) -> Self {
        self.sidecar.formats = formats;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_lock_mode(mut self, mode: LockMode) -> Self {
        self.lock.mode = mode;
        self
    }

    /// Check option values.
    pub fn validate(&self) -> VaultResult<()> {
        if self.state_dir.is_empty()
            || self.state_dir.contains(['/', '\\'])
            || self.state_dir == "."
            || self.state_dir == ".."
        {
            return Err(VaultError::Config(format!(
                "state_dir must be a single directory name, got {:?}",
                self.state_dir
            )));
        }

        if self.sidecar.formats.is_empty() {
            return Err(VaultError::Config(
                "sidecar.formats must name at least one format".to_string(),
            ));
        }

        if self.lock.timeout_ms == 0 || self.lock.timeout_ms > 3_600_000 {
            return Err(VaultError::Config(
                "lock.timeout_ms must be in (0, 3600000]".to_string(),
            ));
        }

        self.retention.validate()
    }

    /// Sidecar formats, deduplicated, JSON first when present.
    pub fn sidecar_formats(&self) -> Vec<SidecarFormat> {
        let mut formats = self.sidecar.formats.clone();
        formats.sort();
        formats.dedup();
        formats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_validate() {
        let options = VaultOptions::default();
        options.validate().unwrap();
        assert_eq!(options.versioning, VersioningMode::Content);
        assert_eq!(options.retention, RetentionPolicy::KeepAll);
        assert_eq!(options.lock.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_deserialize_partial() {
        let options: VaultOptions = serde_json::from_value(json!({
            "versioning": "timestamp",
            "retention": {"n": 3, "days": 7},
            "sidecar": {"formats": ["toml", "json", "toml"]}
        }))
        .unwrap();

        assert_eq!(options.versioning, VersioningMode::Timestamp);
        assert_eq!(options.retention, RetentionPolicy::Window { n: Some(3), days: Some(7) });
        assert_eq!(options.sidecar_formats(), vec![SidecarFormat::Json, SidecarFormat::Toml]);
        assert_eq!(options.lock, LockOptions::default());
    }

    #[test]
    fn test_invalid_state_dir() {
        let mut options = VaultOptions::default();
        options.state_dir = "a/b".to_string();
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_empty_sidecar_formats_rejected() {
        let options = VaultOptions::default().with_sidecar_formats(vec![]);
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("sidecar.formats"));
    }

    #[test]
    fn test_zero_lock_timeout_rejected() {
        let options = VaultOptions::default().with_lock_timeout(Duration::ZERO);
        assert!(options.validate().is_err());
    }
}
