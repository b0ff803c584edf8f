//! Observed workloads and the generation IDs they carry

use std::collections::BTreeMap;

use super::roles::RoleSet;

/// A workload as observed in the API server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveWorkload {
    pub name: String,
    pub pool: String,
    pub roles: RoleSet,
    pub generation: String,
    pub ordinal: u32,
    /// Fingerprint recorded when the workload was last rendered
    pub fingerprint: Option<String>,
    /// Certificate bundle version mounted by the pod template
    pub cert_version: u32,
    /// Whether the workload's pod is running and ready
    pub ready: bool,
}

/// Generation and roles of a pool that already has workloads
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExistingPool {
    pub generation: String,
    pub roles: RoleSet,
}

/// Per-pool view of the live workloads, consulted by the planner
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExistingTopology {
    pools: BTreeMap<String, ExistingPool>,
}

impl ExistingTopology {
    /// Collapse live workloads into one entry per pool. When a pool carries
    /// several generations the one on the lowest ordinal wins.
    pub fn from_workloads(workloads: &[LiveWorkload]) -> Self {
        let mut lowest: BTreeMap<&str, &LiveWorkload> = BTreeMap::new();
        for workload in workloads {
            lowest
                .entry(workload.pool.as_str())
                .and_modify(|current| {
                    if (workload.ordinal, &workload.generation)
                        < (current.ordinal, &current.generation)
                    {
                        *current = workload;
                    }
                })
                .or_insert(workload);
        }

        let pools = lowest
            .into_iter()
            .map(|(pool, w)| {
                (
                    pool.to_string(),
                    ExistingPool {
                        generation: w.generation.clone(),
                        roles: w.roles,
                    },
                )
            })
            .collect();
        Self { pools }
    }

    pub fn insert(&mut self, pool: impl Into<String>, existing: ExistingPool) {
        self.pools.insert(pool.into(), existing);
    }

    pub fn get(&self, pool: &str) -> Option<&ExistingPool> {
        self.pools.get(pool)
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
