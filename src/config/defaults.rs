//! Built-in defaults (lowest layer)

use std::path::{Path, PathBuf};

use serde_json::Value;

use super::options::VaultOptions;

/// Project config file name inside the state directory.
pub const PROJECT_CONFIG_FILE: &str = "config.toml";

/// User config file, relative to the user config directory.
pub const USER_CONFIG_PATH: &str = "artifact-vault/config.toml";

/// Built-in defaults as a mergeable layer.
pub fn builtin_layer() -> Value {
    serde_json::to_value(VaultOptions::default()).unwrap_or(Value::Null)
}

/// `<root>/<state_dir>/config.toml`
pub fn project_config_path(root: &Path, state_dir: &str) -> PathBuf {
    root.join(state_dir).join(PROJECT_CONFIG_FILE)
}

/// `$XDG_CONFIG_HOME/artifact-vault/config.toml`, else `~/.config/...`.
pub fn user_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join(USER_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_layer_shape() {
        let value = builtin_layer();

        assert_eq!(value["versioning"], "content");
        assert_eq!(value["retention"], "all");
        assert_eq!(value["sidecar"]["formats"][0], "json");
        assert_eq!(value["lock"]["timeout_ms"], 10_000);
        assert_eq!(value["state_dir"], ".vault");
    }

    #[test]
    fn test_project_config_lives_in_state_dir() {
        assert_eq!(
            project_config_path(Path::new("/work"), "meta"),
            PathBuf::from("/work/meta/config.toml")
        );
    }
}
