//! Desired spec to workload descriptors
//!
//! Planning is pure and deterministic: the same spec, cluster identity and
//! existing generations always produce the same plan.

use std::collections::{BTreeMap, HashSet};

use thiserror::Error;
use uuid::Uuid;

use crate::crd::{ElasticsearchSpec, NodePool, ResourceRequirements, StorageSpec};
use crate::pki::Identity;

use super::live::{ExistingTopology, LiveWorkload};
use super::quorum::QuorumRequirement;
use super::redundancy::ReplicaRequirement;
use super::roles::RoleSet;

/// StatefulSet names longer than this break the controller-revision-hash label
pub const MAX_WORKLOAD_NAME_LEN: usize = 52;

/// Length of minted generation IDs
pub const GENERATION_ID_LEN: usize = 8;

const GENERATION_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_8d3b_4b7a_9e51_0c2d_7f48_a913);
const FINGERPRINT_NAMESPACE: Uuid = Uuid::from_u128(0x0b9e_53d1_47c6_4f08_b2aa_e1d5_3c86_f274);

/// Reasons a spec cannot be planned
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("no node pool carries the master role with a non-zero node count")]
    NoMasterNodes,

    #[error("node pool {pool} has negative node count {count}")]
    NegativeNodeCount { pool: String, count: i32 },

    #[error("node pool {0} has no roles")]
    EmptyRoles(String),

    #[error("node pool name {0} is used more than once")]
    DuplicatePool(String),

    #[error("every node pool needs a name")]
    EmptyPoolName,

    #[error("node pool {pool} has invalid generation ID {generation:?}")]
    InvalidGeneration { pool: String, generation: String },

    #[error("workload name {0} is produced by more than one node pool")]
    NameCollision(String),

    #[error("workload name {name} exceeds {max} characters")]
    NameTooLong { name: String, max: usize },

    #[error("node pool {pool} roles changed from {existing} to {requested}; create a new pool instead")]
    RolesChanged {
        pool: String,
        existing: String,
        requested: String,
    },
}

/// One addressable unit of the cluster: a single pod
#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadDescriptor {
    pub name: String,
    pub cluster: String,
    pub pool: String,
    pub roles: RoleSet,
    pub generation: String,
    pub ordinal: u32,
    pub image: String,
    pub resources: Option<ResourceRequirements>,
    pub storage: Option<StorageSpec>,
    /// Secret holding the node certificate bundle
    pub tls_secret: String,
    /// Certificate bundle version the workload should mount
    pub cert_version: u32,
}

impl WorkloadDescriptor {
    /// Content hash over everything but the certificate version.
    ///
    /// Certificate changes are tracked separately so they roll out as
    /// restarts rather than re-renders.
    pub fn fingerprint(&self) -> String {
        let content = serde_json::json!({
            "name": self.name,
            "pool": self.pool,
            "roles": self.roles.annotation(),
            "generation": self.generation,
            "ordinal": self.ordinal,
            "image": self.image,
            "resources": self.resources,
            "storage": self.storage,
            "tlsSecret": self.tls_secret,
        });
        Uuid::new_v5(&FINGERPRINT_NAMESPACE, content.to_string().as_bytes())
            .simple()
            .to_string()
    }
}

/// Output of the planner
#[derive(Clone, Debug, PartialEq)]
pub struct TopologyPlan {
    /// Descriptors in spec pool order, then ordinal
    pub descriptors: Vec<WorkloadDescriptor>,
    pub quorum: QuorumRequirement,
    pub replicas: ReplicaRequirement,
    /// Generation ID chosen for every pool, including empty ones
    pub generations: BTreeMap<String, String>,
}

impl TopologyPlan {
    /// Stamp every descriptor with the node certificate bundle version
    pub fn with_cert_version(mut self, version: u32) -> Self {
        for descriptor in &mut self.descriptors {
            descriptor.cert_version = version;
        }
        self
    }

    /// Quorum to publish while `live` runs. Surplus masters still present
    /// keep it raised until their deletes have gone through.
    pub fn effective_quorum(&self, live: &[LiveWorkload]) -> QuorumRequirement {
        let live_masters = live.iter().filter(|w| w.roles.is_master()).count() as u32;
        QuorumRequirement::for_masters(self.quorum.masters.max(live_masters))
    }

    pub fn get(&self, name: &str) -> Option<&WorkloadDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Redundancy policy cannot be met with the planned data nodes
    pub fn is_degraded(&self) -> bool {
        !self.replicas.achievable
    }

    pub fn data_nodes(&self) -> u32 {
        self.descriptors.iter().filter(|d| d.roles.is_data()).count() as u32
    }
}

/// Workload name for a pool member
pub fn workload_name(cluster: &str, roles: RoleSet, generation: &str, ordinal: u32) -> String {
    format!("{}-{}-{}-{}", cluster, roles.class_tag(), generation, ordinal)
}

/// Deterministic generation ID for a pool that has neither an explicit nor
/// an existing one
pub fn mint_generation(cluster_uid: &str, pool: &str) -> String {
    Uuid::new_v5(
        &GENERATION_NAMESPACE,
        format!("{}/{}", cluster_uid, pool).as_bytes(),
    )
    .simple()
    .to_string()
    .chars()
    .take(GENERATION_ID_LEN)
    .collect()
}

/// Translate the desired spec into workload descriptors.
///
/// `existing` carries the generation IDs and role sets of pools that already
/// have workloads, so that generations survive replanning and role changes are
/// rejected.
pub fn plan(
    cluster_name: &str,
    cluster_uid: &str,
    spec: &ElasticsearchSpec,
    existing: &ExistingTopology,
) -> Result<TopologyPlan, PlanError> {
    validate_pools(&spec.nodes)?;

    let tls_secret = Identity::Node.secret_name(cluster_name);
    let mut descriptors = Vec::new();
    let mut generations = BTreeMap::new();
    let mut names = HashSet::new();

    for pool in &spec.nodes {
        let roles = RoleSet::from_roles(&pool.roles)
            .ok_or_else(|| PlanError::EmptyRoles(pool.name.clone()))?;

        let previous = existing.get(&pool.name);
        if let Some(previous) = previous
            && previous.roles != roles
        {
            return Err(PlanError::RolesChanged {
                pool: pool.name.clone(),
                existing: previous.roles.annotation(),
                requested: roles.annotation(),
            });
        }

        let generation = match (&pool.gen_uuid, previous) {
            (Some(explicit), _) => explicit.clone(),
            (None, Some(previous)) => previous.generation.clone(),
            (None, None) => mint_generation(cluster_uid, &pool.name),
        };
        generations.insert(pool.name.clone(), generation.clone());

        for ordinal in 0..pool.node_count.max(0) as u32 {
            let name = workload_name(cluster_name, roles, &generation, ordinal);
            if name.len() > MAX_WORKLOAD_NAME_LEN {
                return Err(PlanError::NameTooLong {
                    name,
                    max: MAX_WORKLOAD_NAME_LEN,
                });
            }
            if !names.insert(name.clone()) {
                return Err(PlanError::NameCollision(name));
            }
            descriptors.push(WorkloadDescriptor {
                name,
                cluster: cluster_name.to_string(),
                pool: pool.name.clone(),
                roles,
                generation: generation.clone(),
                ordinal,
                image: spec.image.clone(),
                resources: pool.resources.clone().or_else(|| spec.resources.clone()),
                storage: pool.storage.clone(),
                tls_secret: tls_secret.clone(),
                cert_version: 0,
            });
        }
    }

    let masters = descriptors.iter().filter(|d| d.roles.is_master()).count() as u32;
    if masters == 0 {
        return Err(PlanError::NoMasterNodes);
    }
    let data_nodes = descriptors.iter().filter(|d| d.roles.is_data()).count() as u32;

    Ok(TopologyPlan {
        descriptors,
        quorum: QuorumRequirement::for_masters(masters),
        replicas: ReplicaRequirement::for_policy(spec.redundancy_policy, data_nodes),
        generations,
    })
}

fn validate_pools(pools: &[NodePool]) -> Result<(), PlanError> {
    let mut seen = HashSet::new();
    for pool in pools {
        if pool.name.is_empty() {
            return Err(PlanError::EmptyPoolName);
        }
        if !seen.insert(pool.name.as_str()) {
            return Err(PlanError::DuplicatePool(pool.name.clone()));
        }
        if pool.node_count < 0 {
            return Err(PlanError::NegativeNodeCount {
                pool: pool.name.clone(),
                count: pool.node_count,
            });
        }
        if pool.roles.is_empty() {
            return Err(PlanError::EmptyRoles(pool.name.clone()));
        }
        if let Some(generation) = &pool.gen_uuid
            && !is_valid_generation(generation)
        {
            return Err(PlanError::InvalidGeneration {
                pool: pool.name.clone(),
                generation: generation.clone(),
            });
        }
    }
    Ok(())
}

fn is_valid_generation(generation: &str) -> bool {
    !generation.is_empty()
        && generation
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}
