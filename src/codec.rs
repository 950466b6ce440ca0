//! Artifact codecs
//!
//! The vault only needs encoded bytes (to hash and size them) and a way back
//! to a value on load. Codecs are looked up by format tag; the tag is stored on
//! the artifact record so loads use the codec that wrote the file.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{IoResultExt, VaultError, VaultResult};
use crate::fsutil::atomic_write;

/// In-memory artifact content.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactData {
    Bytes(Vec<u8>),
    Text(String),
    Json(Value),
}

impl ArtifactData {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ArtifactData::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ArtifactData::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ArtifactData::Bytes(b) => Some(b),
            ArtifactData::Text(s) => Some(s.as_bytes()),
            ArtifactData::Json(_) => None,
        }
    }

    /// Tag of the codec that naturally encodes this variant.
    pub fn natural_format(&self) -> &'static str {
        match self {
            ArtifactData::Bytes(_) => BytesCodec::TAG,
            ArtifactData::Text(_) => TextCodec::TAG,
            ArtifactData::Json(_) => JsonCodec::TAG,
        }
    }
}

impl From<Value> for ArtifactData {
    fn from(v: Value) -> Self {
        ArtifactData::Json(v)
    }
}

impl From<String> for ArtifactData {
    fn from(s: String) -> Self {
        ArtifactData::Text(s)
    }
}

impl From<&str> for ArtifactData {
    fn from(s: &str) -> Self {
        ArtifactData::Text(s.to_string())
    }
}

impl From<Vec<u8>> for ArtifactData {
    fn from(b: Vec<u8>) -> Self {
        ArtifactData::Bytes(b)
    }
}

/// Serialization backend for one format tag.
pub trait Codec: fmt::Debug + Send + Sync {
    fn format_tag(&self) -> &str;

    /// Bytes written to disk.
    fn encode(&self, data: &ArtifactData) -> VaultResult<Vec<u8>>;

    /// Bytes the content hash is computed over. Defaults to the file bytes;
    /// codecs with several equivalent encodings return a canonical form.
    fn canonical_bytes(&self, data: &ArtifactData) -> VaultResult<Vec<u8>> {
        self.encode(data)
    }

    fn decode(&self, bytes: Vec<u8>) -> VaultResult<ArtifactData>;

    /// Encode and atomically write `data` to `path`, returning the size.
    fn write(&self, data: &ArtifactData, path: &Path) -> VaultResult<u64> {
        let bytes = self.encode(data)?;
        atomic_write(path, &bytes).at(path)?;
        Ok(bytes.len() as u64)
    }

    fn read(&self, path: &Path) -> VaultResult<ArtifactData> {
        let bytes = fs::read(path).at(path)?;
        self.decode(bytes)
    }
}

fn codec_error(format: &str, message: impl Into<String>) -> VaultError {
    VaultError::Codec {
        format: format.to_string(),
        message: message.into(),
    }
}

/// JSON values. Files are pretty-printed; the content hash is taken over the
/// RFC 8785 canonical form so formatting never counts as a change.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub const TAG: &'static str = "json";

    fn value(data: &ArtifactData) -> VaultResult<Value> {
        match data {
            ArtifactData::Json(value) => Ok(value.clone()),
            ArtifactData::Text(text) => serde_json::from_str(text)
                .map_err(|e| codec_error(Self::TAG, format!("text is not JSON: {e}"))),
            ArtifactData::Bytes(_) => Err(codec_error(Self::TAG, "cannot encode raw bytes as JSON")),
        }
    }
}

impl Codec for JsonCodec {
    fn format_tag(&self) -> &str {
        Self::TAG
    }

    fn encode(&self, data: &ArtifactData) -> VaultResult<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(&Self::value(data)?)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn canonical_bytes(&self, data: &ArtifactData) -> VaultResult<Vec<u8>> {
        serde_json_canonicalizer::to_vec(&Self::value(data)?)
            .map_err(|e| codec_error(Self::TAG, e.to_string()))
    }

    fn decode(&self, bytes: Vec<u8>) -> VaultResult<ArtifactData> {
        serde_json::from_slice(&bytes)
            .map(ArtifactData::Json)
            .map_err(|e| codec_error(Self::TAG, e.to_string()))
    }
}

/// UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl TextCodec {
    pub const TAG: &'static str = "text";
}

impl Codec for TextCodec {
    fn format_tag(&self) -> &str {
        Self::TAG
    }

    fn encode(&self, data: &ArtifactData) -> VaultResult<Vec<u8>> {
        match data {
            ArtifactData::Text(text) => Ok(text.as_bytes().to_vec()),
            ArtifactData::Bytes(bytes) => std::str::from_utf8(bytes)
                .map(|s| s.as_bytes().to_vec())
                .map_err(|e| codec_error(Self::TAG, e.to_string())),
            ArtifactData::Json(_) => Err(codec_error(Self::TAG, "use the json codec for JSON values")),
        }
    }

    fn decode(&self, bytes: Vec<u8>) -> VaultResult<ArtifactData> {
        String::from_utf8(bytes)
            .map(ArtifactData::Text)
            .map_err(|e| codec_error(Self::TAG, e.to_string()))
    }
}

/// Opaque bytes, stored verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl BytesCodec {
    pub const TAG: &'static str = "bytes";
}

impl Codec for BytesCodec {
    fn format_tag(&self) -> &str {
        Self::TAG
    }

    fn encode(&self, data: &ArtifactData) -> VaultResult<Vec<u8>> {
        data.as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| codec_error(Self::TAG, "JSON values need the json codec"))
    }

    fn decode(&self, bytes: Vec<u8>) -> VaultResult<ArtifactData> {
        Ok(ArtifactData::Bytes(bytes))
    }
}

/// Codecs keyed by format tag.
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    codecs: BTreeMap<String, Arc<dyn Codec>>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self {
            codecs: BTreeMap::new(),
        };
        registry.register(Arc::new(JsonCodec));
        registry.register(Arc::new(TextCodec));
        registry.register(Arc::new(BytesCodec));
        registry
    }
}

impl CodecRegistry {
    /// Add or replace the codec for its format tag.
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        self.codecs.insert(codec.format_tag().to_string(), codec);
    }

    pub fn get(&self, tag: &str) -> VaultResult<Arc<dyn Codec>> {
        self.codecs
            .get(tag)
            .cloned()
            .ok_or_else(|| codec_error(tag, "no codec registered for format"))
    }

    /// Pick a format for `path`: extension first, then the data variant.
    pub fn infer(&self, path: &Path, data: &ArtifactData) -> String {
        let by_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .and_then(|ext| match ext.as_str() {
                "json" => Some(JsonCodec::TAG),
                "txt" | "csv" | "tsv" | "md" | "log" | "yaml" | "yml" => Some(TextCodec::TAG),
                _ => None,
            });

        match (by_extension, data) {
            // A JSON value saved under a .txt name still needs the JSON codec
            (Some(TextCodec::TAG), ArtifactData::Json(_)) => JsonCodec::TAG.to_string(),
            (Some(JsonCodec::TAG), ArtifactData::Bytes(_)) => BytesCodec::TAG.to_string(),
            (Some(tag), _) => tag.to_string(),
            (None, data) => data.natural_format().to_string(),
        }
    }
}
