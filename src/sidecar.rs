//! Mutable per-artifact metadata kept beside the live file
//!
//! `<path>.sidecar.json` and/or `<path>.sidecar.toml`, rewritten on every save.
//! The parent pointers here are only a level-1 lineage fallback; committed
//! manifests are authoritative.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SidecarFormat;
use crate::error::{IoResultExt, VaultError, VaultResult};
use crate::fsutil::atomic_write;
use crate::lineage::ParentPointer;

pub const SIDECAR_SCHEMA_ID: &str = "artifact-vault/sidecar@1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    pub schema_id: String,
    pub artifact_path: PathBuf,
    pub artifact_id: String,
    pub format_tag: String,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_hash: Option<String>,
    pub file_hash: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// Absent when the save did not create a version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// Columns that identify a row in tabular artifacts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identity_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<ParentPointer>,
}

/// Live sidecar location for `artifact` in `format`.
pub fn sidecar_path(artifact: &Path, format: SidecarFormat) -> PathBuf {
    let mut name = artifact
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".sidecar.{}", format.extension()));
    artifact.with_file_name(name)
}

impl Sidecar {
    pub fn encode(&self, format: SidecarFormat) -> VaultResult<Vec<u8>> {
        match format {
            SidecarFormat::Json => {
                let mut bytes = serde_json::to_vec_pretty(self)?;
                bytes.push(b'\n');
                Ok(bytes)
            }
            SidecarFormat::Toml => {
                // TOML has no null; drop null attributes rather than fail
                let mut doc = self.clone();
                doc.attributes = doc
                    .attributes
                    .into_iter()
                    .filter_map(|(k, v)| strip_nulls(v).map(|v| (k, v)))
                    .collect();
                toml::to_string_pretty(&doc)
                    .map(String::into_bytes)
                    .map_err(|e| VaultError::Codec {
                        format: "toml".to_string(),
                        message: e.to_string(),
                    })
            }
        }
    }

    pub fn decode(format: SidecarFormat, bytes: &[u8]) -> VaultResult<Self> {
        match format {
            SidecarFormat::Json => Ok(serde_json::from_slice(bytes)?),
            SidecarFormat::Toml => {
                let text = std::str::from_utf8(bytes).map_err(|e| toml_error(e.to_string()))?;
                toml::from_str(text).map_err(|e| toml_error(e.to_string()))
            }
        }
    }

    /// Write one sidecar per format beside `artifact`; returns the encoded
    /// documents in format order.
    pub fn write_all(&self, artifact: &Path, formats: &[SidecarFormat]) -> VaultResult<Vec<(SidecarFormat, Vec<u8>)>> {
        let mut written = Vec::with_capacity(formats.len());
        for &format in formats {
            let path = sidecar_path(artifact, format);
            let bytes = self.encode(format)?;
            atomic_write(&path, &bytes).at(&path)?;
            written.push((format, bytes));
        }
        Ok(written)
    }

    /// Read the first sidecar present, trying `formats` then the remaining
    /// known formats.
    pub fn read(artifact: &Path, formats: &[SidecarFormat]) -> VaultResult<Option<Self>> {
        let mut order: Vec<SidecarFormat> = formats.to_vec();
        for format in [SidecarFormat::Json, SidecarFormat::Toml] {
            if !order.contains(&format) {
                order.push(format);
            }
        }

        for format in order {
            let path = sidecar_path(artifact, format);
            match fs::read(&path) {
                Ok(bytes) => return Self::decode(format, &bytes).map(Some),
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(VaultError::io(path, e)),
            }
        }
        Ok(None)
    }
}

fn toml_error(message: String) -> VaultError {
    VaultError::Codec {
        format: "toml".to_string(),
        message,
    }
}

fn strip_nulls(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Array(items) => Some(Value::Array(items.into_iter().filter_map(strip_nulls).collect())),
        Value::Object(map) => Some(Value::Object(
            map.into_iter()
                .filter_map(|(k, v)| strip_nulls(v).map(|v| (k, v)))
                .collect(),
        )),
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample() -> Sidecar {
        Sidecar {
            schema_id: SIDECAR_SCHEMA_ID.to_string(),
            artifact_path: PathBuf::from("/data/clean.csv"),
            artifact_id: "abc".to_string(),
            format_tag: "text".to_string(),
            content_hash: "c".to_string(),
            code_hash: Some("k".to_string()),
            file_hash: "f".to_string(),
            size_bytes: 12,
            created_at: Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap(),
            version_id: Some("v1".to_string()),
            identity_keys: vec!["id".to_string()],
            attributes: BTreeMap::from([
                ("rows".to_string(), json!(3)),
                ("note".to_string(), Value::Null),
            ]),
            parents: vec![ParentPointer {
                path: PathBuf::from("/data/raw.csv"),
                artifact_id: "def".to_string(),
                version_id: "pv1".to_string(),
            }],
        }
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/d/x.json"), SidecarFormat::Toml),
            PathBuf::from("/d/x.json.sidecar.toml")
        );
    }

    #[test]
    fn test_write_both_and_read_preferred() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("clean.csv");
        let sidecar = sample();

        let written = sidecar
            .write_all(&artifact, &[SidecarFormat::Json, SidecarFormat::Toml])
            .unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].1, fs::read(sidecar_path(&artifact, SidecarFormat::Json)).unwrap());

        let from_json = Sidecar::read(&artifact, &[SidecarFormat::Json]).unwrap().unwrap();
        assert_eq!(from_json, sidecar);

        let from_toml = Sidecar::read(&artifact, &[SidecarFormat::Toml]).unwrap().unwrap();
        assert_eq!(from_toml.parents, sidecar.parents);
        assert_eq!(from_toml.attributes.get("rows"), Some(&json!(3)));
        assert!(!from_toml.attributes.contains_key("note"));
    }

    #[test]
    fn test_read_falls_back_to_other_format() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("a.txt");
        sample().write_all(&artifact, &[SidecarFormat::Toml]).unwrap();

        let read = Sidecar::read(&artifact, &[SidecarFormat::Json]).unwrap();
        assert!(read.is_some());
    }

    #[test]
    fn test_read_absent() {
        let dir = TempDir::new().unwrap();
        assert!(Sidecar::read(&dir.path().join("a"), &[SidecarFormat::Json]).unwrap().is_none());
    }
}
