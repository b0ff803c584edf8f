//! Test fixtures and builders for Elasticsearch resources
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let cluster = create_test_cluster("logs", "logging", 3);
//!
//! let cluster = ElasticsearchBuilder::new("logs", "logging")
//!     .with_pool("masters", &[NodeRole::Master], 3)
//!     .with_pool("data", &[NodeRole::Data, NodeRole::Client], 2)
//!     .with_redundancy(RedundancyPolicy::SingleRedundancy)
//!     .build();
//! ```

use elasticsearch_operator::crd::{
    Elasticsearch, ElasticsearchSpec, ElasticsearchStatus, ManagementState, NodePool, NodeRole,
    RedundancyPolicy, StorageSpec,
};
use elasticsearch_operator::elasticsearch::{ClusterStatus, NodeReadiness};
use elasticsearch_operator::crd::ClusterHealth;
use elasticsearch_operator::topology::{LiveWorkload, WorkloadDescriptor};
use kube::core::ObjectMeta;

pub const TEST_UID: &str = "6b1f3c52-8e0a-4d47-a3c1-2f9d8e7b6a50";

/// Every role on every node
pub const ALL_ROLES: &[NodeRole] = &[NodeRole::Master, NodeRole::Data, NodeRole::Client];

// =============================================================================
// Convenience Functions for Simple Test Cases
// =============================================================================

/// Cluster with a single pool of `nodes` nodes carrying every role
pub fn create_test_cluster(name: &str, namespace: &str, nodes: i32) -> Elasticsearch {
    ElasticsearchBuilder::new(name, namespace)
        .with_pool("nodes", ALL_ROLES, nodes)
        .build()
}

/// Node pool with no storage and no resource overrides
pub fn pool(name: &str, roles: &[NodeRole], node_count: i32) -> NodePool {
    NodePool {
        name: name.to_string(),
        roles: roles.to_vec(),
        node_count,
        storage: None,
        gen_uuid: None,
        resources: None,
    }
}

// =============================================================================
// Elasticsearch Builder
// =============================================================================

/// Builder for Elasticsearch test fixtures
#[allow(dead_code)]
pub struct ElasticsearchBuilder {
    name: String,
    namespace: String,
    uid: Option<String>,
    generation: Option<i64>,
    spec: ElasticsearchSpec,
    status: Option<ElasticsearchStatus>,
}

#[allow(dead_code)]
impl ElasticsearchBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            uid: Some(TEST_UID.to_string()),
            generation: Some(1),
            spec: ElasticsearchSpec::default(),
            status: None,
        }
    }

    pub fn with_uid(mut self, uid: &str) -> Self {
        self.uid = Some(uid.to_string());
        self
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn with_pool(mut self, name: &str, roles: &[NodeRole], node_count: i32) -> Self {
        self.spec.nodes.push(pool(name, roles, node_count));
        self
    }

    /// Attach persistent storage to the most recently added pool
    pub fn with_storage(mut self, size: &str, storage_class: Option<&str>) -> Self {
        if let Some(last) = self.spec.nodes.last_mut() {
            last.storage = Some(StorageSpec {
                storage_class: storage_class.map(str::to_string),
                size: size.to_string(),
            });
        }
        self
    }

    /// Pin the generation ID of the most recently added pool
    pub fn with_gen_uuid(mut self, gen_uuid: &str) -> Self {
        if let Some(last) = self.spec.nodes.last_mut() {
            last.gen_uuid = Some(gen_uuid.to_string());
        }
        self
    }

    pub fn with_redundancy(mut self, policy: RedundancyPolicy) -> Self {
        self.spec.redundancy_policy = policy;
        self
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.spec.image = image.to_string();
        self
    }

    pub fn unmanaged(mut self) -> Self {
        self.spec.management_state = ManagementState::Unmanaged;
        self
    }

    pub fn with_status(mut self, status: ElasticsearchStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn build(self) -> Elasticsearch {
        Elasticsearch {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                uid: self.uid,
                generation: self.generation,
                ..Default::default()
            },
            spec: self.spec,
            status: self.status,
        }
    }
}

// =============================================================================
// Live state helpers
// =============================================================================

/// The workload a descriptor renders to, as observed after it rolled out
pub fn live_from(descriptor: &WorkloadDescriptor, ready: bool) -> LiveWorkload {
    LiveWorkload {
        name: descriptor.name.clone(),
        pool: descriptor.pool.clone(),
        roles: descriptor.roles,
        generation: descriptor.generation.clone(),
        ordinal: descriptor.ordinal,
        fingerprint: Some(descriptor.fingerprint()),
        cert_version: descriptor.cert_version,
        ready,
    }
}

/// Health snapshot with `masters` joined master-eligible nodes
pub fn cluster_status(health: ClusterHealth, masters: u32) -> ClusterStatus {
    ClusterStatus {
        health,
        nodes: (0..masters)
            .map(|i| NodeReadiness {
                name: format!("master-{}", i),
                master_eligible: true,
                data: true,
                elected_master: i == 0,
            })
            .collect(),
    }
}
