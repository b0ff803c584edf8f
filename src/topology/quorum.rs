//! Master quorum arithmetic

/// Minimum number of master-eligible nodes that must agree for the cluster to
/// elect a master: `floor(masters / 2) + 1`.
pub fn quorum_for(masters: u32) -> u32 {
    masters / 2 + 1
}

/// Quorum derived from the planned master count
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuorumRequirement {
    /// Planned master-eligible nodes
    pub masters: u32,
    /// Majority of `masters`
    pub quorum: u32,
}

impl QuorumRequirement {
    pub fn for_masters(masters: u32) -> Self {
        Self {
            masters,
            quorum: quorum_for(masters),
        }
    }
}

/// Quorum state recomputed from live observations before each guarded step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuorumState {
    /// Master-bearing workloads currently present
    pub live_masters: u32,
    /// Masters that the cluster reports as joined
    pub ready_masters: u32,
    /// Majority of `live_masters`
    pub quorum: u32,
}

impl QuorumState {
    pub fn new(live_masters: u32, ready_masters: u32) -> Self {
        Self {
            live_masters,
            ready_masters,
            quorum: quorum_for(live_masters),
        }
    }

    /// Whether one more master may be taken down without losing the majority
    pub fn can_take_down_master(&self) -> bool {
        self.ready_masters.saturating_sub(1) >= self.quorum && self.ready_masters > 0
    }
}
