//! Retention: which versions to keep, and removal of the rest

mod policy;
mod pruner;

pub use policy::{evaluate, RetentionDecision, RetentionPolicy};
pub use pruner::{PruneReport, PrunedVersion, Pruner};
