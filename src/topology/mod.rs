//! Topology planning: node pools to per-node workloads, plus the quorum and
//! redundancy requirements the plan implies.

mod live;
mod planner;
mod quorum;
mod redundancy;
mod roles;

pub use live::{ExistingPool, ExistingTopology, LiveWorkload};
pub use planner::{
    GENERATION_ID_LEN, MAX_WORKLOAD_NAME_LEN, PlanError, TopologyPlan, WorkloadDescriptor,
    mint_generation, plan, workload_name,
};
pub use quorum::{QuorumRequirement, QuorumState, quorum_for};
pub use redundancy::ReplicaRequirement;
pub use roles::RoleSet;
