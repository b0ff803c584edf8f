//! Redundancy policy to replica-shard mapping

use crate::crd::RedundancyPolicy;

impl RedundancyPolicy {
    /// Replica shards the policy asks for given the number of data nodes.
    ///
    /// The result may exceed what the data nodes can hold; see
    /// [`ReplicaRequirement::for_policy`] for the clamped value.
    pub fn replica_shards(&self, data_nodes: u32) -> u32 {
        match self {
            RedundancyPolicy::ZeroRedundancy => 0,
            RedundancyPolicy::SingleRedundancy => 1,
            RedundancyPolicy::MultipleRedundancy => data_nodes.saturating_sub(1) / 2,
            RedundancyPolicy::FullRedundancy => data_nodes.saturating_sub(1),
        }
    }
}

/// Replica shards the planned topology can actually hold
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplicaRequirement {
    pub policy: RedundancyPolicy,
    /// Replica shards to apply, clamped to `data_nodes - 1`
    pub replicas: u32,
    /// Whether the policy's requested count fits on the data nodes
    pub achievable: bool,
}

impl ReplicaRequirement {
    pub fn for_policy(policy: RedundancyPolicy, data_nodes: u32) -> Self {
        let requested = policy.replica_shards(data_nodes);
        let achievable = data_nodes > requested;
        let replicas = if achievable {
            requested
        } else {
            data_nodes.saturating_sub(1)
        };
        Self {
            policy,
            replicas,
            achievable,
        }
    }
}
