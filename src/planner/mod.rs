//! Staleness detection, rebuild planning and execution

mod builder;
mod executor;
mod plan;
mod staleness;

pub use builder::{BuildContext, BuildError, BuildFn, BuildInput, BuildOutput, BuilderRegistry};
pub use executor::{RebuildEntry, RebuildReport, RebuildStatus};
pub use plan::{PlanEntry, PlanMode, PlanReason, RebuildPlan};
pub use staleness::ParentDrift;
