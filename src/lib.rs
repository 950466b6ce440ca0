//! Artifact Vault - local versioned artifact store
//!
//! Saves artifacts to the file system and snapshots every content change
//! under a state directory. Each snapshot records the exact parent versions
//! it was derived from, so the vault can trace lineage, detect stale outputs,
//! plan level-ordered rebuilds and prune old versions by retention policy.

pub mod catalog;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod hash;
pub mod identity;
pub mod lineage;
pub mod load;
pub mod planner;
pub mod retention;
pub mod save;
pub mod sidecar;
pub mod vault;
pub mod version;

pub use artifact_vault_lock::{CatalogLock, FileLock, LockError, LockStrength, MarkerLock};
pub use catalog::{ArtifactRecord, Catalog, VersionRecord};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{ArtifactData, Codec, CodecRegistry};
pub use config::{EffectiveConfig, LockMode, SidecarFormat, VaultOptions, VersioningMode};
pub use error::{VaultError, VaultResult};
pub use lineage::{Depth, LineageNode, LineageTrace, ParentPointer, ParentRef};
pub use load::{Integrity, VerifyReport};
pub use planner::{
    BuildContext, BuildError, BuildOutput, PlanEntry, PlanMode, PlanReason, RebuildPlan, RebuildReport, RebuildStatus,
};
pub use retention::{PruneReport, RetentionPolicy};
pub use save::{SaveAction, SaveOutcome, SaveReason, SaveRequest};
pub use sidecar::Sidecar;
pub use vault::Vault;
