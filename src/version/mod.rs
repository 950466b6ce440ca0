//! Version store: identifiers, snapshots and committed parents manifests

mod id;
mod manifest;
mod snapshot;

pub use id::{version_id, SUFFIX_LEN};
pub use manifest::{read_manifest, scan_manifests, ParentsManifest, MANIFEST_FILE, MANIFEST_SCHEMA_ID};
pub use snapshot::{is_staging_name, sidecar_file, SnapshotContents, SnapshotStore, ARTIFACT_FILE, EXTERNAL_DIR};
