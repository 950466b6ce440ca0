//! Effective configuration with provenance
//!
//! Records the merged configuration together with every file that
//! contributed to it, so `avault config` can show where a value came from.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::defaults::{builtin_layer, project_config_path};
use super::merge::merge_layers;
use super::options::VaultOptions;
use crate::error::{VaultError, VaultResult};
use crate::hash::sha256_hex;

/// Schema identifier
pub const SCHEMA_ID: &str = "artifact-vault/effective_config@1";

/// Origin of a configuration layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    User,
    Project,
    Cli,
}

/// A contributing layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Merged configuration plus its sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub schema_id: String,

    /// The merged configuration object
    pub config: Value,

    /// Contributing sources, lowest precedence first
    pub sources: Vec<ConfigSource>,
}

impl EffectiveConfig {
    /// Merge builtin defaults, the user file, the project file and CLI
    /// overrides, in that order. Missing files are skipped.
    pub fn build(
        user_config: Option<&Path>,
        project_config: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> VaultResult<Self> {
        let mut layers = vec![builtin_layer()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        for (origin, path) in [
            (ConfigOrigin::User, user_config),
            (ConfigOrigin::Project, project_config),
        ] {
            let Some(path) = path.filter(|p| p.exists()) else {
                continue;
            };
            let (value, digest) = load_toml_file(path)?;
            tracing::debug!(origin = ?origin, path = %path.display(), "loaded config layer");
            layers.push(value);
            sources.push(ConfigSource {
                origin,
                path: Some(path.to_string_lossy().into_owned()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        Ok(Self {
            schema_id: SCHEMA_ID.to_string(),
            config: merge_layers(layers),
            sources,
        })
    }

    /// Configuration for the managed root `root`.
    ///
    /// The project file lives in the state directory, so `state_dir` is
    /// resolved from every layer except the project file first.
    pub fn for_root(root: &Path, user_config: Option<&Path>, cli_overrides: Option<Value>) -> VaultResult<Self> {
        let bootstrap = Self::build(user_config, None, cli_overrides.clone())?;
        let state_dir = bootstrap
            .get("state_dir")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| VaultOptions::default().state_dir);
        let project = project_config_path(root, &state_dir);
        Self::build(user_config, Some(&project), cli_overrides)
    }

    /// Typed, validated options.
    pub fn options(&self) -> VaultResult<VaultOptions> {
        let options: VaultOptions = serde_json::from_value(self.config.clone())
            .map_err(|e| VaultError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Get a config value by dot-separated path
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.config, |current, part| current.get(part))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Parse a TOML file into a JSON value, returning it with the file digest.
fn load_toml_file(path: &Path) -> VaultResult<(Value, String)> {
    let bytes = fs::read(path).map_err(|e| VaultError::io(path, e))?;
    let digest = sha256_hex(&bytes);

    let contents = String::from_utf8(bytes)
        .map_err(|e| VaultError::Config(format!("{}: invalid UTF-8: {e}", path.display())))?;
    let value: toml::Value = toml::from_str(&contents)
        .map_err(|e| VaultError::Config(format!("{}: {e}", path.display())))?;

    Ok((toml_to_json(value), digest))
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => {
            Value::Object(table.into_iter().map(|(k, v)| (k, toml_to_json(v))).collect())
        }
    }
}
