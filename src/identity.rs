//! Artifact path canonicalization and identity
//!
//! Policy:
//! - relative paths are resolved against a base directory (the vault root)
//! - `.` and `..` are resolved lexically; symlinks are not followed, so an
//!   artifact keeps its identity whether or not the file exists yet
//! - case is preserved and significant on every platform
//! - the id is the SHA-256 of the canonical path rendered with `/` separators,
//!   so the same path hashes identically across processes and platforms

use std::path::{Component, Path, PathBuf};

use crate::hash::sha256_hex;

/// Length of the artifact-id prefix used in out-of-root snapshot buckets.
pub const SHORT_ID_LEN: usize = 12;

/// Resolve `path` to an absolute, lexically normalized path.
pub fn canonicalize(path: &Path, base: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    normalize(&joined)
}

/// Resolve `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays at the root
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Render a canonical path with `/` separators.
pub fn portable_string(path: &Path) -> String {
    let rendered = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        rendered.into_owned()
    } else {
        rendered.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// Stable identifier for a canonical artifact path.
pub fn artifact_id(canonical: &Path) -> String {
    sha256_hex(portable_string(canonical).as_bytes())
}

/// Path of `path` relative to `root`, if it lies under it.
pub fn relative_to_root(path: &Path, root: &Path) -> Option<PathBuf> {
    path.strip_prefix(root).ok().map(Path::to_path_buf)
}
