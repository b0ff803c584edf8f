//! Status and conditions management for Elasticsearch resources
//!
//! The reconciler assembles a [`StatusReport`] each pass; [`build_status`]
//! turns it into the status subresource and [`StatusManager`] writes it back
//! only when something changed.

use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use tracing::debug;

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::controller::sequencer::{Decision, Deferral};
use crate::crd::{
    CertificateStatus, ClusterHealth, ClusterPhase, Condition, Elasticsearch, ElasticsearchStatus,
    NodePoolStatus, PauseReason, RolloutPhase, RolloutState,
};
use crate::resources::common::FIELD_MANAGER;

/// Condition types reported on the resource
pub mod condition_types {
    /// Live topology matches the spec and health is at least Yellow
    pub const READY: &str = "Ready";
    /// A rollout is in flight
    pub const PROGRESSING: &str = "Progressing";
    /// Cluster serves data below its health or redundancy target
    pub const DEGRADED: &str = "Degraded";
    /// The in-flight change waited longer than the maximum wait
    pub const ROLLOUT_STALLED: &str = "RolloutStalled";
    /// A master change is deferred to protect quorum
    pub const QUORUM_BLOCKED: &str = "QuorumBlocked";
    /// Applying a change keeps failing with retryable errors
    pub const TRANSIENT_ERRORS: &str = "TransientErrors";
    pub const CA_EXPIRING: &str = "CertificateAuthorityExpiring";
    /// Data nodes are too few for the redundancy policy
    pub const REDUNDANCY_UNACHIEVABLE: &str = "RedundancyUnachievable";
    pub const SPEC_VALID: &str = "SpecValid";
    /// Secrets or other owned state keep failing to persist
    pub const PERSISTENCE_FAILURE: &str = "PersistenceFailure";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    /// Create from existing conditions
    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't.
    /// The transition time only moves when the status changes.
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = Utc::now().to_rfc3339();
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: Utc::now().to_rfc3339(),
                observed_generation: self.generation,
            });
        }
        self
    }

    /// Boolean condition
    pub fn flag(self, type_: &str, value: bool, reason: &str, message: &str) -> Self {
        let status = if value {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(type_, status, reason, message)
    }

    pub fn ready(self, is_ready: bool, reason: &str, message: &str) -> Self {
        self.flag(condition_types::READY, is_ready, reason, message)
    }

    pub fn progressing(self, is_progressing: bool, reason: &str, message: &str) -> Self {
        self.flag(condition_types::PROGRESSING, is_progressing, reason, message)
    }

    pub fn degraded(self, is_degraded: bool, reason: &str, message: &str) -> Self {
        self.flag(condition_types::DEGRADED, is_degraded, reason, message)
    }

    /// Current status of a condition type, if present
    pub fn status_of(&self, type_: &str) -> Option<&str> {
        self.conditions
            .iter()
            .find(|c| c.type_ == type_)
            .map(|c| c.status.as_str())
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Everything observed in one reconcile pass that ends up in status
#[derive(Clone, Debug, Default)]
pub struct StatusReport {
    pub generation: Option<i64>,
    pub managed: bool,
    pub health: ClusterHealth,
    pub pools: Vec<NodePoolStatus>,
    pub rollout: RolloutState,
    /// Sequencer decision of this pass; `None` when the sequencer did not run
    pub decision: Option<DecisionFlags>,
    /// Replica shards the redundancy policy asks for, and whether enough data
    /// nodes are planned to hold them
    pub replicas: Option<(u32, bool)>,
    /// Replica shard count applied to the live cluster this pass
    pub replica_shards_applied: Option<i32>,
    pub certificates: Vec<CertificateStatus>,
    pub ca_expiring: bool,
    /// Description of the change applied this pass
    pub applied_step: Option<String>,
    /// Planning error of an unmanaged cluster, whose rollout stays frozen
    pub spec_error: Option<String>,
}

/// The parts of a [`Decision`] reflected in conditions
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecisionFlags {
    pub held: bool,
    pub stalled: bool,
    pub quorum_blocked: Option<String>,
    pub retries_exhausted: bool,
}

impl From<&Decision> for DecisionFlags {
    fn from(decision: &Decision) -> Self {
        Self {
            held: decision.held,
            stalled: decision.stalled,
            quorum_blocked: match &decision.deferred {
                Some(Deferral::Quorum(message)) => Some(message.clone()),
                _ => None,
            },
            retries_exhausted: decision.retries_exhausted,
        }
    }
}

/// Lifecycle phase summarising the rollout and the observed cluster
pub fn derive_phase(report: &StatusReport) -> ClusterPhase {
    if !report.managed {
        return ClusterPhase::Paused;
    }
    match report.rollout.phase {
        RolloutPhase::Failed => return ClusterPhase::Failed,
        RolloutPhase::Paused => return ClusterPhase::Paused,
        RolloutPhase::Diffing | RolloutPhase::Applying | RolloutPhase::AwaitingHealth => {
            return ClusterPhase::RollingOut;
        }
        RolloutPhase::Idle => {}
    }

    let ready: i32 = report.pools.iter().map(|p| p.ready).sum();
    if ready == 0 {
        return ClusterPhase::Pending;
    }
    let all_ready = report.pools.iter().all(|p| p.ready >= p.desired);
    let achievable = report.replicas.is_none_or(|(_, achievable)| achievable);
    if all_ready && achievable && report.health.at_least(ClusterHealth::Yellow) {
        ClusterPhase::Running
    } else {
        ClusterPhase::Degraded
    }
}

/// Build the status subresource for a pass
pub fn build_status(existing: Option<&ElasticsearchStatus>, report: StatusReport) -> ElasticsearchStatus {
    let phase = derive_phase(&report);
    let existing_conditions = existing.map(|s| s.conditions.clone()).unwrap_or_default();
    let rollout = &report.rollout;
    let message = rollout.message.clone().unwrap_or_default();

    let mut builder = ConditionBuilder::from_existing(existing_conditions, report.generation)
        .ready(
            phase == ClusterPhase::Running,
            &phase.to_string(),
            match phase {
                ClusterPhase::Running => "Cluster matches its spec",
                ClusterPhase::Pending => "No node is ready yet",
                ClusterPhase::RollingOut => "Rollout in progress",
                ClusterPhase::Degraded => "Cluster is below its health or redundancy target",
                ClusterPhase::Paused => "Reconciliation is suspended",
                ClusterPhase::Failed => "Operator intervention required",
                ClusterPhase::Deleting => "Cluster is being deleted",
            },
        )
        .progressing(
            phase == ClusterPhase::RollingOut,
            &rollout.phase.to_string(),
            &match rollout.current() {
                Some(change) if phase == ClusterPhase::RollingOut => format!(
                    "Step {}/{}: {}",
                    rollout.cursor + 1,
                    rollout.changes.len(),
                    change
                ),
                _ => "No rollout in progress".to_string(),
            },
        )
        .degraded(
            phase == ClusterPhase::Degraded || report.health == ClusterHealth::Red,
            &format!("Health{}", report.health),
            &format!("Cluster health is {}", report.health),
        );

    builder = match (&report.spec_error, rollout.phase) {
        (Some(error), _) => builder.flag(condition_types::SPEC_VALID, false, "InvalidSpec", error),
        (None, RolloutPhase::Failed) => {
            builder.flag(condition_types::SPEC_VALID, false, "InvalidSpec", &message)
        }
        (None, _) => builder.flag(condition_types::SPEC_VALID, true, "Planned", "Spec plans successfully"),
    };

    // reaching the end of a pass means owned state persisted
    if builder.status_of(condition_types::PERSISTENCE_FAILURE).is_some() {
        builder = builder.flag(condition_types::PERSISTENCE_FAILURE, false, "Persisted", "");
    }

    match &report.decision {
        // waits that were not re-evaluated keep their conditions
        Some(flags) if flags.held => {}
        Some(flags) => {
            builder = builder
                .flag(
                    condition_types::ROLLOUT_STALLED,
                    flags.stalled,
                    if flags.stalled { "MaxWaitExceeded" } else { "WithinMaxWait" },
                    if flags.stalled { &message } else { "" },
                )
                .flag(
                    condition_types::QUORUM_BLOCKED,
                    flags.quorum_blocked.is_some(),
                    if flags.quorum_blocked.is_some() { "MasterChangeDeferred" } else { "QuorumSafe" },
                    flags.quorum_blocked.as_deref().unwrap_or(""),
                )
                .flag(
                    condition_types::TRANSIENT_ERRORS,
                    flags.retries_exhausted,
                    if flags.retries_exhausted { "RetryBudgetExceeded" } else { "NoErrors" },
                    if flags.retries_exhausted { &message } else { "" },
                );
        }
        None if rollout.phase == RolloutPhase::Paused
            && rollout.pause_reason == Some(PauseReason::Unmanaged) => {}
        None => {
            builder = builder
                .flag(condition_types::ROLLOUT_STALLED, false, "WithinMaxWait", "")
                .flag(condition_types::QUORUM_BLOCKED, false, "QuorumSafe", "")
                .flag(condition_types::TRANSIENT_ERRORS, false, "NoErrors", "");
        }
    }

    if let Some((replicas, achievable)) = report.replicas {
        builder = builder.flag(
            condition_types::REDUNDANCY_UNACHIEVABLE,
            !achievable,
            if achievable { "Achievable" } else { "TooFewDataNodes" },
            &if achievable {
                format!("{} replica shards", replicas)
            } else {
                format!("Clamped to {} replica shards", replicas)
            },
        );
    }

    builder = builder.flag(
        condition_types::CA_EXPIRING,
        report.ca_expiring,
        if report.ca_expiring { "RotationHorizonReached" } else { "Valid" },
        if report.ca_expiring {
            "Certificate authority expires within the rotation horizon and needs manual rotation"
        } else {
            ""
        },
    );

    ElasticsearchStatus {
        phase,
        cluster_health: report.health,
        pools: report.pools,
        last_rollout_step: report
            .applied_step
            .or_else(|| existing.and_then(|s| s.last_rollout_step.clone())),
        replica_shards: report
            .replica_shards_applied
            .or_else(|| existing.and_then(|s| s.replica_shards)),
        certificates: report.certificates,
        observed_generation: report.generation,
        conditions: builder.build(),
        rollout: report.rollout,
    }
}

/// A pass-level error that kept recurring and is now reported as a condition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecurringFailure {
    pub condition: &'static str,
    pub reason: &'static str,
    /// Blocking failures also take the cluster out of Ready
    pub blocking: bool,
}

/// Map an error that failed `streak` consecutive passes to the condition it
/// raises once the streak reaches `budget`. Halting errors have their own
/// path and non-retryable errors wait for intervention without a condition.
pub fn recurring_failure(error: &Error, streak: u32, budget: u32) -> Option<RecurringFailure> {
    if streak < budget.max(1) || error.is_halting() || !error.is_retryable() {
        return None;
    }
    Some(match error {
        Error::PersistenceFailure(_) => RecurringFailure {
            condition: condition_types::PERSISTENCE_FAILURE,
            reason: "PersistenceFailing",
            blocking: true,
        },
        _ => RecurringFailure {
            condition: condition_types::TRANSIENT_ERRORS,
            reason: "RetryBudgetExceeded",
            blocking: false,
        },
    })
}

/// Raise a recurring failure on top of the stored status. Phase and rollout
/// stay as the last successful pass left them.
pub fn with_failure(
    existing: Option<&ElasticsearchStatus>,
    generation: Option<i64>,
    failure: &RecurringFailure,
    message: &str,
) -> ElasticsearchStatus {
    let existing = existing.cloned().unwrap_or_default();
    let mut builder = ConditionBuilder::from_existing(existing.conditions.clone(), generation)
        .flag(failure.condition, true, failure.reason, message);
    if failure.blocking {
        builder = builder.ready(false, failure.reason, message);
    }
    ElasticsearchStatus {
        conditions: builder.build(),
        ..existing
    }
}

/// Status manager for Elasticsearch resources
pub struct StatusManager<'a> {
    cluster: &'a Elasticsearch,
    ctx: &'a Context,
    ns: &'a str,
}

impl<'a> StatusManager<'a> {
    pub fn new(cluster: &'a Elasticsearch, ctx: &'a Context, ns: &'a str) -> Self {
        Self { cluster, ctx, ns }
    }

    /// Write the status unless it equals the one already stored.
    /// Returns whether a patch was sent.
    pub async fn update(&self, status: ElasticsearchStatus) -> Result<bool> {
        if self.cluster.status.as_ref() == Some(&status) {
            debug!(name = %self.cluster.name_any(), "Status unchanged");
            return Ok(false);
        }

        let api: Api<Elasticsearch> = Api::namespaced(self.ctx.client.clone(), self.ns);
        let patch = serde_json::json!({
            "status": status
        });
        api.patch_status(
            &self.cluster.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(true)
    }

    /// Record a halting error (invalid spec or corrupt CA)
    pub async fn set_failed(&self, rollout: RolloutState, reason: &str, message: &str) -> Result<bool> {
        let generation = self.cluster.metadata.generation;
        let existing = self.cluster.status.clone().unwrap_or_default();

        let conditions = ConditionBuilder::from_existing(existing.conditions.clone(), generation)
            .ready(false, reason, message)
            .progressing(false, "Failed", message)
            .degraded(true, reason, message)
            .build();

        self.update(ElasticsearchStatus {
            phase: ClusterPhase::Failed,
            rollout,
            observed_generation: generation,
            conditions,
            ..existing
        })
        .await
    }

    /// Surface an error that keeps failing whole passes
    pub async fn set_recurring_failure(&self, failure: &RecurringFailure, message: &str) -> Result<bool> {
        let status = with_failure(
            self.cluster.status.as_ref(),
            self.cluster.metadata.generation,
            failure,
            message,
        );
        self.update(status).await
    }

    /// Update status for a deleting cluster
    pub async fn set_deleting(&self, rollout: RolloutState) -> Result<bool> {
        let generation = self.cluster.metadata.generation;
        let existing = self.cluster.status.clone().unwrap_or_default();

        let conditions = ConditionBuilder::from_existing(existing.conditions.clone(), generation)
            .ready(false, "Deleting", "Cluster is being deleted")
            .progressing(true, "Terminating", "Cluster resources are being cleaned up")
            .build();

        self.update(ElasticsearchStatus {
            phase: ClusterPhase::Deleting,
            rollout,
            observed_generation: generation,
            conditions,
            ..existing
        })
        .await
    }
}

/// Check if the cluster spec has changed by comparing observed generation
pub fn spec_changed(cluster: &Elasticsearch) -> bool {
    let current_generation = cluster.metadata.generation;
    let observed_generation = cluster.status.as_ref().and_then(|s| s.observed_generation);

    match (current_generation, observed_generation) {
        (Some(current), Some(observed)) => current != observed,
        _ => true,
    }
}
