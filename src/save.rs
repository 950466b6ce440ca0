//! Save decision engine
//!
//! | state             | content | timestamp | off   |
//! |-------------------|---------|-----------|-------|
//! | absent            | version | version   | write |
//! | present, changed  | version | version   | write |
//! | present, same     | skip    | version   | write |
//!
//! "Changed" means the content hash differs, the producing code's hash
//! differs (when code is tracked on both sides) or the declared parents now
//! resolve to different versions. The unchanged check reads the catalog without
//! the lock; two processes saving identical content at once may both version.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::Serialize;
use serde_json::Value;

use crate::catalog::{ArtifactUpdate, Catalog, VersionRecord};
use crate::codec::{ArtifactData, BytesCodec};
use crate::config::VersioningMode;
use crate::error::{IoResultExt, VaultError, VaultResult};
use crate::fsutil::atomic_write;
use crate::identity::artifact_id;
use crate::lineage::{ParentPointer, ParentRef};
use crate::retention::PrunedVersion;
use crate::sidecar::{Sidecar, SIDECAR_SCHEMA_ID};
use crate::vault::Vault;
use crate::version::{version_id, ParentsManifest, SnapshotContents};

/// One save call.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub path: PathBuf,
    pub data: ArtifactData,
    /// Codec tag; inferred from the path and data when absent
    pub format: Option<String>,
    /// Identity of the producing code (source text, version string, ...)
    pub code: Option<String>,
    pub parents: Vec<ParentRef>,
    pub identity_keys: Vec<String>,
    pub attributes: BTreeMap<String, Value>,
    /// File bytes to write instead of the codec's encoding
    verbatim: Option<Vec<u8>>,
}

impl SaveRequest {
    pub fn new(path: impl Into<PathBuf>, data: impl Into<ArtifactData>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
            format: None,
            code: None,
            parents: Vec::new(),
            identity_keys: Vec::new(),
            attributes: BTreeMap::new(),
            verbatim: None,
        }
    }

    pub fn format(mut self, tag: impl Into<String>) -> Self {
        self.format = Some(tag.into());
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn parent(mut self, parent: ParentRef) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn parents(mut self, parents: impl IntoIterator<Item = ParentRef>) -> Self {
        self.parents.extend(parents);
        self
    }

    pub fn identity_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.identity_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveAction {
    Written,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveReason {
    NewArtifact,
    ContentChanged,
    CodeChanged,
    ParentsChanged,
    NoChangePolicy,
    TimestampPolicy,
    VersioningOff,
}

impl SaveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveReason::NewArtifact => "new_artifact",
            SaveReason::ContentChanged => "content_changed",
            SaveReason::CodeChanged => "code_changed",
            SaveReason::ParentsChanged => "parents_changed",
            SaveReason::NoChangePolicy => "no_change_policy",
            SaveReason::TimestampPolicy => "timestamp_policy",
            SaveReason::VersioningOff => "versioning_off",
        }
    }
}

impl fmt::Display for SaveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveOutcome {
    pub path: PathBuf,
    pub artifact_id: String,
    pub action: SaveAction,
    pub reason: SaveReason,
    /// New version, or the current latest when skipped
    pub version_id: Option<String>,
    pub content_hash: String,
    pub size_bytes: u64,
    /// Versions removed by retention after this save
    pub pruned: Vec<PrunedVersion>,
}

impl SaveOutcome {
    pub fn is_written(&self) -> bool {
        self.action == SaveAction::Written
    }

    /// Whether this save created a version.
    pub fn versioned(&self) -> bool {
        self.is_written() && self.version_id.is_some()
    }
}

impl Vault {
    /// Save `request.data` at `request.path`, versioning per the active mode.
    pub fn save(&self, request: SaveRequest) -> VaultResult<SaveOutcome> {
        let canonical = self.canonical(&request.path);
        let id = artifact_id(&canonical);
        let format = match &request.format {
            Some(tag) => tag.clone(),
            None => self.codecs.infer(&canonical, &request.data),
        };
        let codec = self.codecs.get(&format)?;

        // Validation and encoding happen before any file is touched
        let catalog = self.catalog.read()?;
        let parents = self.resolve_parents(&catalog, &request.parents)?;
        let encoded = match request.verbatim {
            Some(bytes) => bytes,
            None => codec.encode(&request.data)?,
        };
        let content_hash = self.hasher.hash(&codec.canonical_bytes(&request.data)?);
        let file_hash = self.hasher.hash(&encoded);
        let code_hash = request.code.as_deref().map(|c| self.hasher.hash(c.as_bytes()));

        let latest = catalog.latest_version(&id);
        let parents_changed =
            latest.is_some() && !parents.is_empty() && self.parents_differ(&catalog, &canonical, &parents)?;
        let reason = match (self.options.versioning, latest) {
            (VersioningMode::Off, _) => SaveReason::VersioningOff,
            (_, None) => SaveReason::NewArtifact,
            (_, Some(_)) if !canonical.is_file() => SaveReason::NewArtifact,
            (_, Some(latest)) if latest.content_hash != content_hash => SaveReason::ContentChanged,
            (_, Some(latest)) if code_changed(latest.code_hash.as_deref(), code_hash.as_deref()) => {
                SaveReason::CodeChanged
            }
            (_, Some(_)) if parents_changed => SaveReason::ParentsChanged,
            (VersioningMode::Timestamp, Some(_)) => SaveReason::TimestampPolicy,
            (VersioningMode::Content, Some(latest)) => {
                tracing::debug!(path = %canonical.display(), version_id = %latest.version_id, "unchanged, skipping save");
                return Ok(SaveOutcome {
                    path: canonical,
                    artifact_id: id,
                    action: SaveAction::Skipped,
                    reason: SaveReason::NoChangePolicy,
                    version_id: Some(latest.version_id.clone()),
                    content_hash,
                    size_bytes: latest.size_bytes,
                    pruned: Vec::new(),
                });
            }
        };

        let versioned = self.options.versioning != VersioningMode::Off;
        let mut created_at = self.clock.now();
        if let Some(latest) = latest {
            // Keep the new version strictly latest under clock skew
            if versioned && created_at <= latest.created_at {
                created_at = latest.created_at + Duration::microseconds(1);
            }
        }
        let new_version_id = versioned.then(|| version_id(&id, &content_hash, code_hash.as_deref(), created_at));

        atomic_write(&canonical, &encoded).at(&canonical)?;
        let size_bytes = encoded.len() as u64;

        let sidecar = Sidecar {
            schema_id: SIDECAR_SCHEMA_ID.to_string(),
            artifact_path: canonical.clone(),
            artifact_id: id.clone(),
            format_tag: format.clone(),
            content_hash: content_hash.clone(),
            code_hash: code_hash.clone(),
            file_hash: file_hash.clone(),
            size_bytes,
            created_at,
            version_id: new_version_id.clone(),
            identity_keys: request.identity_keys,
            attributes: request.attributes,
            parents: parents.clone(),
        };
        let formats = self.options.sidecar_formats();
        let sidecars = sidecar.write_all(&canonical, &formats)?;

        let mut pruned = Vec::new();
        if let Some(version_id) = &new_version_id {
            let manifest = (!parents.is_empty()).then(|| {
                ParentsManifest::new(canonical.clone(), id.clone(), version_id.clone(), created_at, parents.clone())
            });
            let dir = self.snapshots.snapshot_dir(&canonical, &id, version_id);
            let created = self.snapshots.commit(
                &dir,
                version_id,
                SnapshotContents {
                    artifact: &encoded,
                    sidecars: &sidecars,
                    manifest: manifest.as_ref(),
                },
            )?;

            let parent_ids: Vec<String> = parents.iter().map(|p| p.artifact_id.clone()).collect();
            let recorded = self.catalog.record_version(
                VersionRecord {
                    version_id: version_id.clone(),
                    artifact_id: id.clone(),
                    content_hash: content_hash.clone(),
                    code_hash,
                    file_hash: Some(file_hash),
                    size_bytes,
                    created_at,
                    sidecar_format: formats,
                },
                ArtifactUpdate {
                    canonical_path: canonical.clone(),
                    format_tag: format,
                },
                &parent_ids,
            );
            if let Err(e) = recorded {
                // No row will point at this snapshot; a retry commits a fresh one
                if created {
                    if let Err(cleanup) = self.snapshots.remove(&dir) {
                        tracing::warn!(snapshot = %dir.display(), error = %cleanup, "failed to remove unrecorded snapshot");
                    }
                }
                return Err(e);
            }
            pruned = self.apply_retention(&id);
        }

        tracing::info!(
            path = %canonical.display(),
            %reason,
            version_id = new_version_id.as_deref().unwrap_or("-"),
            size_bytes,
            "artifact saved"
        );

        Ok(SaveOutcome {
            path: canonical,
            artifact_id: id,
            action: SaveAction::Written,
            reason,
            version_id: new_version_id,
            content_hash,
            size_bytes,
            pruned,
        })
    }

    /// Version an existing file in place, under its recorded codec or as
    /// opaque bytes. The file's bytes are kept as they are; the codec only
    /// supplies the content hash.
    pub fn track(&self, path: impl AsRef<Path>) -> VaultResult<SaveOutcome> {
        let canonical = self.canonical(path);
        if !canonical.is_file() {
            return Err(VaultError::ArtifactNotFound { path: canonical });
        }
        let bytes = fs::read(&canonical).at(&canonical)?;
        let catalog = self.catalog.read()?;
        let format = catalog
            .artifact_by_path(&canonical)
            .map(|a| a.format_tag.clone())
            .unwrap_or_else(|| BytesCodec::TAG.to_string());
        let data = self.codecs.get(&format)?.decode(bytes.clone())?;

        let mut request = SaveRequest::new(canonical, data).format(format);
        request.verbatim = Some(bytes);
        self.save(request)
    }

    fn parents_differ(
        &self,
        catalog: &Catalog,
        canonical: &Path,
        parents: &[ParentPointer],
    ) -> VaultResult<bool> {
        let (mut recorded, _) = self.direct_parents(catalog, canonical)?;
        let mut declared = parents.to_vec();
        recorded.sort();
        declared.sort();
        Ok(recorded != declared)
    }
}

/// Code counts as changed only when both sides track it.
fn code_changed(stored: Option<&str>, current: Option<&str>) -> bool {
    matches!((stored, current), (Some(a), Some(b)) if a != b)
}
