use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Elasticsearch is the Schema for the elasticsearches API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "logging.openshift.io",
    version = "v1",
    kind = "Elasticsearch",
    plural = "elasticsearches",
    shortname = "es",
    namespaced,
    status = "ElasticsearchStatus",
    printcolumn = r#"{"name":"Management", "type":"string", "jsonPath":".spec.managementState"}"#,
    printcolumn = r#"{"name":"Health", "type":"string", "jsonPath":".status.clusterHealth"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Rollout", "type":"string", "jsonPath":".status.rollout.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchSpec {
    /// Managed clusters are reconciled; Unmanaged clusters are left untouched
    #[serde(default)]
    pub management_state: ManagementState,

    /// Data replication target across data-role nodes
    #[serde(default)]
    pub redundancy_policy: RedundancyPolicy,

    /// Elasticsearch image reference used by every node
    #[serde(default = "default_image")]
    pub image: String,

    /// Default resource requirements, overridable per node pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Ordered list of node pools
    #[serde(default)]
    pub nodes: Vec<NodePool>,
}

pub const DEFAULT_IMAGE: &str = "quay.io/openshift-logging/elasticsearch6:6.8.1";

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

impl Default for ElasticsearchSpec {
    fn default() -> Self {
        Self {
            management_state: ManagementState::default(),
            redundancy_policy: RedundancyPolicy::default(),
            image: default_image(),
            resources: None,
            nodes: Vec::new(),
        }
    }
}

/// Whether the operator is allowed to mutate the cluster
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum ManagementState {
    #[default]
    Managed,
    Unmanaged,
}

/// Replica shard policy for indices
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum RedundancyPolicy {
    /// No replica shards
    ZeroRedundancy,
    /// One replica shard per primary
    #[default]
    SingleRedundancy,
    /// Replicas on half of the data nodes
    MultipleRedundancy,
    /// Replicas on every data node
    FullRedundancy,
}

impl std::fmt::Display for RedundancyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RedundancyPolicy::ZeroRedundancy => write!(f, "ZeroRedundancy"),
            RedundancyPolicy::SingleRedundancy => write!(f, "SingleRedundancy"),
            RedundancyPolicy::MultipleRedundancy => write!(f, "MultipleRedundancy"),
            RedundancyPolicy::FullRedundancy => write!(f, "FullRedundancy"),
        }
    }
}

/// Role a node can hold inside the cluster
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Client,
    Data,
    Master,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Client => write!(f, "client"),
            NodeRole::Data => write!(f, "data"),
            NodeRole::Master => write!(f, "master"),
        }
    }
}

/// A named group of identical nodes
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePool {
    /// Pool name, unique within the cluster
    pub name: String,

    /// Roles held by every node in the pool
    pub roles: Vec<NodeRole>,

    /// Number of nodes in the pool
    #[serde(default)]
    pub node_count: i32,

    /// Persistent storage; ephemeral storage is used when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,

    /// Generation identifier used in workload names
    #[serde(default, rename = "genUUID", skip_serializing_if = "Option::is_none")]
    pub gen_uuid: Option<String>,

    /// Pool-specific resource requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

/// Storage configuration for Elasticsearch data volumes
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Storage class name (uses default if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Size of the persistent volume (e.g., "10Gi", "100Gi")
    pub size: String,
}

/// Resource requirements for Elasticsearch pods
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// CPU and memory limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceList>,

    /// CPU and memory requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceList>,
}

/// Resource quantities for CPU and memory
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct ResourceList {
    /// CPU quantity (e.g., "500m", "2")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    /// Memory quantity (e.g., "512Mi", "2Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Status of the Elasticsearch cluster
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchStatus {
    /// Current phase of the cluster lifecycle
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Last observed cluster health
    #[serde(default)]
    pub cluster_health: ClusterHealth,

    /// Per-pool node counts
    #[serde(default)]
    pub pools: Vec<NodePoolStatus>,

    /// Persisted rollout progress
    #[serde(default)]
    pub rollout: RolloutState,

    /// Human-readable description of the last rollout step
    #[serde(default)]
    pub last_rollout_step: Option<String>,

    /// Replica shard count last applied to the live cluster
    #[serde(default)]
    pub replica_shards: Option<i32>,

    /// Certificate bundles managed for this cluster
    #[serde(default)]
    pub certificates: Vec<CertificateStatus>,

    /// Observed generation of the resource
    #[serde(default)]
    pub observed_generation: Option<i64>,

    /// Kubernetes-style conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Cluster lifecycle phase
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum ClusterPhase {
    /// Cluster is waiting to be created
    #[default]
    Pending,
    /// Live topology matches the spec and the cluster serves data
    Running,
    /// Changes are being rolled out one node at a time
    RollingOut,
    /// Cluster serves data but is short of its redundancy or health target
    Degraded,
    /// Reconciliation is suspended
    Paused,
    /// Cluster spec or certificate authority needs operator intervention
    Failed,
    /// Cluster is being deleted
    Deleting,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterPhase::Pending => write!(f, "Pending"),
            ClusterPhase::Running => write!(f, "Running"),
            ClusterPhase::RollingOut => write!(f, "RollingOut"),
            ClusterPhase::Degraded => write!(f, "Degraded"),
            ClusterPhase::Paused => write!(f, "Paused"),
            ClusterPhase::Failed => write!(f, "Failed"),
            ClusterPhase::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Cluster health as reported by the administrative API
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq, PartialOrd, Ord,
)]
pub enum ClusterHealth {
    /// Health could not be determined
    #[default]
    Unknown,
    /// Some primary shards are unassigned
    Red,
    /// All primaries assigned, some replicas are not
    Yellow,
    /// All shards assigned
    Green,
}

impl ClusterHealth {
    /// Whether this health satisfies `required`. Unknown never satisfies anything.
    pub fn at_least(self, required: ClusterHealth) -> bool {
        self != ClusterHealth::Unknown && self >= required
    }
}

impl std::fmt::Display for ClusterHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterHealth::Unknown => write!(f, "Unknown"),
            ClusterHealth::Red => write!(f, "Red"),
            ClusterHealth::Yellow => write!(f, "Yellow"),
            ClusterHealth::Green => write!(f, "Green"),
        }
    }
}

/// Observed node counts of a pool
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolStatus {
    pub name: String,
    pub roles: Vec<NodeRole>,
    /// Generation identifier the pool's workloads are named with
    pub generation: String,
    pub desired: i32,
    pub ready: i32,
}

/// Version and expiry of a managed certificate bundle
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateStatus {
    pub identity: String,
    pub secret_name: String,
    pub version: u32,
    pub not_after: String,
}

/// Rollout sequencer phase
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq, Hash)]
pub enum RolloutPhase {
    #[default]
    Idle,
    Diffing,
    Applying,
    AwaitingHealth,
    Paused,
    Failed,
}

impl std::fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RolloutPhase::Idle => write!(f, "Idle"),
            RolloutPhase::Diffing => write!(f, "Diffing"),
            RolloutPhase::Applying => write!(f, "Applying"),
            RolloutPhase::AwaitingHealth => write!(f, "AwaitingHealth"),
            RolloutPhase::Paused => write!(f, "Paused"),
            RolloutPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Why the sequencer is paused
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum PauseReason {
    /// The resource is in the Unmanaged management state
    Unmanaged,
    /// A step failed with an error that retrying cannot fix
    StepError,
}

/// Kind of change applied to a single workload
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Create a workload that does not exist yet (scale-up)
    Create,
    /// Re-render a workload whose spec changed
    Update,
    /// Restart a workload onto a newer certificate bundle
    Restart,
    /// Remove a workload that is no longer planned (scale-down)
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Create => write!(f, "create"),
            ChangeKind::Update => write!(f, "update"),
            ChangeKind::Restart => write!(f, "restart"),
            ChangeKind::Delete => write!(f, "delete"),
        }
    }
}

/// One queued workload change
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlannedChange {
    pub kind: ChangeKind,
    /// Workload name
    pub workload: String,
    /// Owning node pool
    pub pool: String,
    /// Roles of the workload
    pub roles: Vec<NodeRole>,
    /// Target fingerprint (absent for deletes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Target certificate bundle version (absent for deletes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_version: Option<u32>,
}

impl PlannedChange {
    pub fn is_master(&self) -> bool {
        self.roles.contains(&NodeRole::Master)
    }

    pub fn is_data(&self) -> bool {
        self.roles.contains(&NodeRole::Data)
    }

    /// Deletes and restarts take a running node out of the cluster
    pub fn is_disruptive(&self) -> bool {
        matches!(
            self.kind,
            ChangeKind::Update | ChangeKind::Restart | ChangeKind::Delete
        )
    }
}

impl std::fmt::Display for PlannedChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.workload)
    }
}

/// Rollout progress persisted on the resource status
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolloutState {
    #[serde(default)]
    pub phase: RolloutPhase,

    /// Ordered change queue of the current rollout
    #[serde(default)]
    pub changes: Vec<PlannedChange>,

    /// Index of the in-flight change in `changes`
    #[serde(default)]
    pub cursor: u32,

    /// Consecutive deferrals, health polls or retries of the current step
    #[serde(default)]
    pub attempts: u32,

    /// When the in-flight change started waiting, for a gate or for health (RFC 3339)
    #[serde(default)]
    pub waiting_since: Option<String>,

    /// Earliest time the in-flight change is evaluated again (RFC 3339)
    #[serde(default)]
    pub not_before: Option<String>,

    /// Phase to resume once un-paused
    #[serde(default)]
    pub paused_from: Option<RolloutPhase>,

    #[serde(default)]
    pub pause_reason: Option<PauseReason>,

    /// Resource generation observed when the sequencer paused or failed
    #[serde(default)]
    pub halted_generation: Option<i64>,

    /// Explanation of the last failure, pause or deferral
    #[serde(default)]
    pub message: Option<String>,
}

impl RolloutState {
    /// The in-flight change, if the cursor points inside the queue
    pub fn current(&self) -> Option<&PlannedChange> {
        self.changes.get(self.cursor as usize)
    }

    /// Number of changes not yet completed, including the in-flight one
    pub fn remaining(&self) -> usize {
        self.changes.len().saturating_sub(self.cursor as usize)
    }
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: String,

    /// Generation observed when condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
