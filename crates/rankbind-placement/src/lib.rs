//! rankbind-placement: Rank placement for rankbind
//!
//! This crate turns a requested topology into concrete device bindings:
//! - Placement strategies (block arithmetic, explicit per-node counter)
//! - Per-node device ledger that catches binding collisions
//! - Whole-job plans for Slurm block and cyclic distributions

pub mod ledger;
pub mod placement;
pub mod planner;

pub use ledger::DeviceLedger;
pub use placement::{BlockPlacement, NodeCounterPlacement, PlacementStrategy};
pub use planner::{
    node_for_rank, plan_job, plan_job_with_devices, JobPlan, RankAssignment, MAX_PLAN_WORLD_SIZE,
};
