//! Cluster health probing

use serde_json::json;
use tracing::{debug, warn};

use super::client::{CatNode, ClientError, ClusterApi};
use crate::crd::ClusterHealth;

/// Index template carrying the replica-shard setting for new indices
pub const REPLICA_TEMPLATE: &str = "common.settings.operator";

/// Readiness of a node as reported by `_cat/nodes`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeReadiness {
    pub name: String,
    pub master_eligible: bool,
    pub data: bool,
    pub elected_master: bool,
}

impl From<CatNode> for NodeReadiness {
    fn from(node: CatNode) -> Self {
        Self {
            master_eligible: node.node_role.contains('m'),
            data: node.node_role.contains('d'),
            elected_master: node.master.trim() == "*",
            name: node.name,
        }
    }
}

/// Snapshot of the cluster's health
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterStatus {
    pub health: ClusterHealth,
    pub nodes: Vec<NodeReadiness>,
}

impl ClusterStatus {
    /// Snapshot used when the cluster could not be reached
    pub fn unknown() -> Self {
        Self {
            health: ClusterHealth::Unknown,
            nodes: Vec::new(),
        }
    }

    /// Master-eligible nodes that have joined the cluster
    pub fn ready_masters(&self) -> u32 {
        self.nodes.iter().filter(|n| n.master_eligible).count() as u32
    }

    pub fn has_elected_master(&self) -> bool {
        self.nodes.iter().any(|n| n.elected_master)
    }
}

/// Map the `status` field of `_cluster/health` onto [`ClusterHealth`]
pub fn classify(status: &str) -> ClusterHealth {
    match status.trim().to_ascii_lowercase().as_str() {
        "green" => ClusterHealth::Green,
        "yellow" => ClusterHealth::Yellow,
        "red" => ClusterHealth::Red,
        _ => ClusterHealth::Unknown,
    }
}

/// Queries cluster health through the administrative API.
///
/// Every call is bounded by the client's timeout and never retried here.
pub struct HealthProber<C> {
    api: C,
}

impl<C: ClusterApi> HealthProber<C> {
    pub fn new(api: C) -> Self {
        Self { api }
    }

    /// Health plus node readiness. Transient failures yield an
    /// [`ClusterHealth::Unknown`] snapshot instead of an error.
    pub async fn status(&self) -> Result<ClusterStatus, ClientError> {
        let health = match self.api.cluster_health().await {
            Ok(response) => classify(&response.status),
            Err(e) if e.is_transient() => {
                debug!(error = %e, "Cluster health unavailable");
                return Ok(ClusterStatus::unknown());
            }
            Err(e) => return Err(e),
        };

        let nodes = match self.api.cat_nodes().await {
            Ok(nodes) => nodes.into_iter().map(NodeReadiness::from).collect(),
            Err(e) if e.is_transient() => {
                debug!(error = %e, "Node list unavailable");
                return Ok(ClusterStatus::unknown());
            }
            Err(e) => return Err(e),
        };

        Ok(ClusterStatus { health, nodes })
    }

    /// Set `index.number_of_replicas` on every existing index and on the
    /// template applied to new ones.
    pub async fn apply_replica_shards(&self, replicas: u32) -> Result<(), ClientError> {
        let settings = json!({ "index": { "number_of_replicas": replicas } });
        self.api
            .put_json(&format!("/_template/{}", REPLICA_TEMPLATE), &json!({
                "index_patterns": ["*"],
                "order": 0,
                "settings": settings,
            }))
            .await?;
        if let Err(e) = self.api.put_json("/_all/_settings", &settings).await {
            // no indices yet
            if matches!(e, ClientError::Status { status: 404, .. }) {
                warn!("No indices to update replica shards on");
                return Ok(());
            }
            return Err(e);
        }
        Ok(())
    }
}
