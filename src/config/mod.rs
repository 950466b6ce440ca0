//! Configuration
//!
//! Four layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. User config (`~/.config/artifact-vault/config.toml`)
//! 3. Project config (`<root>/.vault/config.toml`)
//! 4. CLI overrides

mod defaults;
mod effective;
mod merge;
mod options;

pub use defaults::{builtin_layer, project_config_path, user_config_path, PROJECT_CONFIG_FILE, USER_CONFIG_PATH};
pub use effective::{ConfigOrigin, ConfigSource, EffectiveConfig};
pub use merge::{deep_merge, merge_layers};
pub use options::{LockMode, LockOptions, SidecarFormat, SidecarOptions, VaultOptions, VersioningMode};
