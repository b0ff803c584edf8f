//! Reconciliation logic for Elasticsearch resources
//!
//! One pass loads the persisted rollout, observes the live workloads, plans
//! the topology, makes sure the TLS material exists and runs one step of the
//! rollout sequencer. The step's effect (at most one workload change) is
//! performed before the new rollout state and status are written back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::sequencer::{self, Decision, Deferral, Effect, Sequencer, SequencerInput};
use crate::controller::status::{
    DecisionFlags, StatusManager, StatusReport, build_status, recurring_failure, spec_changed,
};
use crate::controller::validation::validate_spec;
use crate::crd::{
    CertificateStatus, ChangeKind, Elasticsearch, ManagementState, NodePoolStatus, PlannedChange,
    RolloutPhase, RolloutState,
};
use crate::elasticsearch::{AdminClient, ClusterStatus, HealthProber};
use crate::pki::{
    CertificateBundle, CertificateManager, Identity, KubeSecretStore, SecretStore, expiring_soon,
};
use crate::resources::common::{FIELD_MANAGER, cluster_selector};
use crate::resources::{config, pdb, service, workload};
use crate::topology::{ExistingTopology, LiveWorkload, TopologyPlan, plan};

/// Finalizer name for cleanup
pub const FINALIZER: &str = "logging.openshift.io/finalizer";

/// Requeue after an idle pass could not push the replica-shard setting
const REPLICA_RETRY: Duration = Duration::from_secs(30);

/// Certificates of one pass
struct TlsMaterial {
    node: Option<CertificateBundle>,
    admin: Option<CertificateBundle>,
    statuses: Vec<CertificateStatus>,
    ca_expiring: bool,
    /// Earliest moment a leaf certificate enters the rotation horizon
    next_rotation: Option<DateTime<Utc>>,
}

/// Main reconciliation function
#[instrument(skip(cluster, ctx), fields(name = %cluster.name_any(), namespace = cluster.namespace().unwrap_or_default()))]
pub async fn reconcile(cluster: Arc<Elasticsearch>, ctx: Arc<Context>) -> Result<Action> {
    let ns = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let started = Instant::now();

    if cluster.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&cluster, &ctx, &ns).await;
    }

    if !has_finalizer(&cluster) {
        add_finalizer(&cluster, &ctx, &ns).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    if spec_changed(&cluster) {
        info!(
            generation = ?cluster.metadata.generation,
            observed = ?cluster.status.as_ref().and_then(|s| s.observed_generation),
            "Spec changed"
        );
    }

    let result = reconcile_cluster(&cluster, &ctx, &ns).await;

    if let Some(state) = &ctx.health_state {
        state
            .metrics
            .record_reconcile(&ns, &name, started.elapsed().as_secs_f64());
    }

    match result {
        Ok(action) => {
            ctx.reset_errors(&format!("{}/{}", ns, name));
            if let Some(state) = &ctx.health_state {
                state.metrics.record_success(&ns, &name, Utc::now());
            }
            Ok(action)
        }
        Err(e) => {
            if e.is_halting() {
                error!(error = %e, "Reconciliation halted");
                let rollout = cluster
                    .status
                    .as_ref()
                    .map(|s| s.rollout.clone())
                    .unwrap_or_default();
                if let Err(err) = StatusManager::new(&cluster, &ctx, &ns)
                    .set_failed(rollout, halting_reason(&e), &e.to_string())
                    .await
                {
                    warn!(error = %err, "Could not record halting error in status");
                }
            } else {
                // error_policy records this failure after we return
                let streak = ctx.error_streak(&format!("{}/{}", ns, name)) + 1;
                let budget = ctx.config.rollout.transient_retry_budget;
                if let Some(failure) = recurring_failure(&e, streak, budget) {
                    warn!(error = %e, streak, condition = failure.condition, "Failure keeps recurring");
                    if let Err(err) = StatusManager::new(&cluster, &ctx, &ns)
                        .set_recurring_failure(&failure, &e.to_string())
                        .await
                    {
                        warn!(error = %err, "Could not record recurring failure in status");
                    }
                }
            }
            Err(e)
        }
    }
}

/// Error policy for the controller with exponential backoff
pub fn error_policy(cluster: Arc<Elasticsearch>, error: &Error, ctx: Arc<Context>) -> Action {
    let ns = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    if error.is_not_found() {
        debug!(%name, "Resource is gone, dropping");
        return Action::await_change();
    }

    let attempt = ctx.record_error(&format!("{}/{}", ns, name), error);
    if let Some(state) = &ctx.health_state {
        state.metrics.record_error(&ns, &name);
    }
    let delay = BackoffConfig::default().delay_for_error(error, attempt.saturating_sub(1));

    if error.is_retryable() {
        warn!(%name, %error, attempt, "Retryable error, requeuing in {:?}", delay);
    } else {
        error!(%name, %error, attempt, "Non-retryable error, requeuing in {:?} for manual intervention", delay);
    }

    Action::requeue(delay)
}

fn halting_reason(error: &Error) -> &'static str {
    match error {
        Error::CaCorruption(_) => "CertificateAuthorityCorrupt",
        _ => "InvalidSpec",
    }
}

async fn reconcile_cluster(cluster: &Elasticsearch, ctx: &Context, ns: &str) -> Result<Action> {
    let name = cluster.name_any();
    let generation = cluster.metadata.generation;
    let managed = cluster.spec.management_state == ManagementState::Managed;
    let now = Utc::now();
    let sequencer = Sequencer::new(ctx.config.rollout.clone());
    let rollout = cluster
        .status
        .as_ref()
        .map(|s| s.rollout.clone())
        .unwrap_or_default();

    let sts_api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), ns);
    let live = observe_workloads(&sts_api, &name).await?;

    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), ns);
    let manager = CertificateManager::new(
        KubeSecretStore::new(secrets, cluster),
        &name,
        ns,
        ctx.config.cert_validity_days,
    );
    let Prepared { plan, tls } =
        prepare(cluster, &manager, &live, managed, ctx.config.cert_rotation_horizon, now).await?;
    let plan = match plan {
        Ok(plan) => plan,
        Err(e) => return halt_invalid(cluster, ctx, ns, &sequencer, &rollout, &live, &tls, &e).await,
    };

    if managed {
        apply_shared_resources(cluster, ctx, ns, &plan, &live).await?;
    }

    let probed = if sequencer.needs_health(&rollout, managed, generation, &plan, &live) {
        Some(probe(cluster, ctx, ns, tls.admin.as_ref()).await)
    } else {
        None
    };
    let health = probed.clone().unwrap_or_else(ClusterStatus::unknown);

    let input = SequencerInput {
        managed,
        generation,
        plan: &plan,
        live: &live,
        health: &health,
        now,
    };
    let mut decision = sequencer.step(&rollout, &input);
    record_decision(ctx, ns, &name, &decision);

    let mut applied_step = None;
    if let Effect::Apply(change) = &decision.effect {
        match apply_change(cluster, ctx, ns, &plan, change).await {
            Ok(()) => {
                info!(change = %change, "Applied rollout step");
                if let Some(state) = &ctx.health_state {
                    state.metrics.record_step(ns, &name, &change.kind.to_string());
                }
                applied_step = Some(change.to_string());
            }
            Err(e) => {
                warn!(change = %change, error = %e, "Rollout step failed");
                decision =
                    sequencer.apply_failed(&decision, e.is_retryable(), &e.to_string(), generation, now);
            }
        }
    }

    let mut requeue = decision.requeue;
    let mut replica_shards_applied = None;
    let at_rest = managed
        && decision.effect == Effect::None
        && decision.state.phase == RolloutPhase::Idle
        && sequencer::diff(&plan, &live).is_empty()
        && live.iter().all(|w| w.ready);
    if at_rest {
        release_previous(&manager).await?;

        let wanted = plan.replicas.replicas as i32;
        let current = cluster.status.as_ref().and_then(|s| s.replica_shards);
        if current != Some(wanted) {
            match apply_replica_shards(cluster, ctx, ns, tls.admin.as_ref(), plan.replicas.replicas).await {
                Ok(()) => replica_shards_applied = Some(wanted),
                Err(e) => {
                    warn!(error = %e, replicas = wanted, "Could not apply replica shards");
                    requeue.get_or_insert(REPLICA_RETRY);
                }
            }
        }
    }

    // health is only probed while a rollout needs it; otherwise keep the last
    // observation
    let observed_health = match &probed {
        Some(status) => status.health,
        None => cluster
            .status
            .as_ref()
            .map(|s| s.cluster_health)
            .unwrap_or_default(),
    };

    let pools = pool_statuses(cluster, &plan, &live);
    let report = StatusReport {
        generation,
        managed,
        health: observed_health,
        pools,
        rollout: decision.state.clone(),
        decision: Some(DecisionFlags::from(&decision)),
        replicas: Some((plan.replicas.replicas, plan.replicas.achievable)),
        replica_shards_applied,
        certificates: tls.statuses.clone(),
        ca_expiring: tls.ca_expiring,
        applied_step,
        spec_error: None,
    };
    let status = build_status(cluster.status.as_ref(), report);
    publish_cluster_metrics(ctx, ns, &name, &status);
    StatusManager::new(cluster, ctx, ns).update(status).await?;

    Ok(match requeue {
        Some(delay) => Action::requeue(delay),
        None if managed => rotation_timer(tls.next_rotation, now),
        None => Action::await_change(),
    })
}

/// Record an unplannable spec and stop until it changes
#[allow(clippy::too_many_arguments)]
async fn halt_invalid(
    cluster: &Elasticsearch,
    ctx: &Context,
    ns: &str,
    sequencer: &Sequencer,
    rollout: &RolloutState,
    live: &[LiveWorkload],
    tls: &TlsMaterial,
    error: &Error,
) -> Result<Action> {
    let message = error.to_string();
    warn!(error = %message, "Spec cannot be planned");
    let managed = cluster.spec.management_state == ManagementState::Managed;
    let decision = sequencer.fail(rollout, managed, &message, cluster.metadata.generation);

    let report = StatusReport {
        generation: cluster.metadata.generation,
        managed,
        health: cluster
            .status
            .as_ref()
            .map(|s| s.cluster_health)
            .unwrap_or_default(),
        pools: live_pool_statuses(cluster, live),
        rollout: decision.state,
        decision: None,
        replicas: None,
        replica_shards_applied: None,
        certificates: tls.statuses.clone(),
        ca_expiring: tls.ca_expiring,
        applied_step: None,
        spec_error: (!managed).then_some(message),
    };
    let status = build_status(cluster.status.as_ref(), report);
    publish_cluster_metrics(ctx, ns, &cluster.name_any(), &status);
    StatusManager::new(cluster, ctx, ns).update(status).await?;
    Ok(Action::await_change())
}

fn record_decision(ctx: &Context, ns: &str, name: &str, decision: &Decision) {
    if let Some(deferral) = &decision.deferred {
        let reason = match deferral {
            Deferral::Quorum(_) => "quorum",
            Deferral::Health(_) => "health",
        };
        debug!(reason, message = deferral.message(), "Rollout step deferred");
        if let Some(state) = &ctx.health_state {
            state.metrics.record_deferral(ns, name, reason);
        }
    }
    if decision.stalled {
        warn!(message = ?decision.state.message, "Rollout stalled");
    }
    for event in &decision.events {
        debug!(%event, "Rollout transition");
    }
}

fn publish_cluster_metrics(ctx: &Context, ns: &str, name: &str, status: &crate::crd::ElasticsearchStatus) {
    if let Some(state) = &ctx.health_state {
        let desired: i64 = status.pools.iter().map(|p| p.desired as i64).sum();
        let ready: i64 = status.pools.iter().map(|p| p.ready as i64).sum();
        state.metrics.set_cluster_phase(ns, name, status.phase);
        state
            .metrics
            .set_cluster_state(ns, name, status.cluster_health, desired, ready);
    }
}

/// Ensure the CA and every leaf bundle, rotating leaves that are about to
/// expire
/// Plan and TLS material of one pass
struct Prepared {
    plan: Result<TopologyPlan>,
    tls: TlsMaterial,
}

/// Plan against the observed workloads, then make sure the TLS material
/// exists. A spec that cannot be planned only reads what is already stored.
async fn prepare<S: SecretStore>(
    cluster: &Elasticsearch,
    manager: &CertificateManager<S>,
    live: &[LiveWorkload],
    managed: bool,
    horizon: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<Prepared> {
    let name = cluster.name_any();
    let planned = validate_spec(&cluster.spec).and_then(|()| {
        plan(
            &name,
            cluster.metadata.uid.as_deref().unwrap_or_default(),
            &cluster.spec,
            &ExistingTopology::from_workloads(live),
        )
        .map_err(Error::from)
    });

    let tls = if managed && planned.is_ok() {
        ensure_certificates(manager, &name, horizon, now).await?
    } else {
        stored_certificates(manager, &name).await?
    };
    let version = tls.node.as_ref().map(|b| b.version).unwrap_or(0);
    Ok(Prepared {
        plan: planned.map(|plan| plan.with_cert_version(version)),
        tls,
    })
}

async fn ensure_certificates<S: SecretStore>(
    manager: &CertificateManager<S>,
    cluster: &str,
    horizon: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<TlsMaterial> {
    let ca = manager.ensure_ca().await?;
    let ca_expiring = ca.info()?.expires_within(horizon, now);
    if ca_expiring {
        warn!("Certificate authority expires within the rotation horizon");
    }

    let mut bundles = Vec::with_capacity(Identity::ALL.len());
    for identity in Identity::ALL {
        let mut bundle = manager.ensure(identity).await?;
        if expiring_soon(&bundle, horizon, now) {
            bundle = manager.rotate(identity).await?;
        }
        bundles.push(bundle);
    }

    Ok(material(cluster, bundles, ca_expiring, horizon))
}

/// Read whatever TLS material exists without writing anything
async fn stored_certificates<S: SecretStore>(
    manager: &CertificateManager<S>,
    cluster: &str,
) -> Result<TlsMaterial> {
    let mut bundles = Vec::new();
    for identity in Identity::ALL {
        if let Some(data) = manager.store().load(&identity.secret_name(cluster)).await?
            && let Ok(bundle) = CertificateBundle::from_data(identity, &data)
        {
            bundles.push(bundle);
        }
    }
    Ok(material(cluster, bundles, false, chrono::Duration::zero()))
}

fn material(
    cluster: &str,
    bundles: Vec<CertificateBundle>,
    ca_expiring: bool,
    horizon: chrono::Duration,
) -> TlsMaterial {
    let statuses = bundles
        .iter()
        .map(|b| CertificateStatus {
            identity: b.identity.as_str().to_string(),
            secret_name: b.identity.secret_name(cluster),
            version: b.version,
            not_after: b.not_after.to_rfc3339_opts(SecondsFormat::Secs, true),
        })
        .collect();
    let next_rotation = bundles.iter().map(|b| b.not_after - horizon).min();
    let pick = |identity: Identity| bundles.iter().find(|b| b.identity == identity).cloned();

    TlsMaterial {
        node: pick(Identity::Node),
        admin: pick(Identity::Admin),
        statuses,
        ca_expiring,
        next_rotation,
    }
}

async fn release_previous<S: SecretStore>(manager: &CertificateManager<S>) -> Result<()> {
    for identity in Identity::ALL {
        if manager.release_previous(identity).await? {
            info!(%identity, "Released superseded certificate");
        }
    }
    Ok(())
}

/// Requeue when the earliest leaf certificate enters the rotation horizon
fn rotation_timer(next_rotation: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Action {
    match next_rotation {
        Some(deadline) => {
            let wait = (deadline - now).to_std().unwrap_or(Duration::from_secs(1));
            debug!(?wait, "Idle until next certificate rotation");
            Action::requeue(wait)
        }
        None => Action::await_change(),
    }
}

fn prober(
    cluster: &Elasticsearch,
    ctx: &Context,
    ns: &str,
    admin: Option<&CertificateBundle>,
) -> Option<HealthProber<AdminClient>> {
    let admin = admin?;
    match AdminClient::for_cluster(&cluster.name_any(), ns, admin, ctx.config.probe_timeout) {
        Ok(client) => Some(HealthProber::new(client)),
        Err(e) => {
            warn!(error = %e, "Cannot build admin client");
            None
        }
    }
}

/// Health snapshot; anything short of an answer is Unknown
async fn probe(
    cluster: &Elasticsearch,
    ctx: &Context,
    ns: &str,
    admin: Option<&CertificateBundle>,
) -> ClusterStatus {
    let Some(prober) = prober(cluster, ctx, ns, admin) else {
        return ClusterStatus::unknown();
    };
    match prober.status().await {
        Ok(status) => {
            debug!(health = %status.health, nodes = status.nodes.len(), "Probed cluster health");
            status
        }
        Err(e) => {
            warn!(error = %e, "Health probe failed");
            ClusterStatus::unknown()
        }
    }
}

async fn apply_replica_shards(
    cluster: &Elasticsearch,
    ctx: &Context,
    ns: &str,
    admin: Option<&CertificateBundle>,
    replicas: u32,
) -> Result<()> {
    let prober = prober(cluster, ctx, ns, admin)
        .ok_or_else(|| Error::TransientError("admin client unavailable".to_string()))?;
    prober.apply_replica_shards(replicas).await?;
    info!(replicas, "Applied replica shard setting");
    Ok(())
}

/// Services, master disruption budget and node configuration
async fn apply_shared_resources(
    cluster: &Elasticsearch,
    ctx: &Context,
    ns: &str,
    plan: &TopologyPlan,
    live: &[LiveWorkload],
) -> Result<()> {
    let quorum = plan.effective_quorum(live);
    apply_resource::<Service>(ctx, ns, &service::generate_cluster_service(cluster)).await?;
    apply_resource::<Service>(ctx, ns, &service::generate_discovery_service(cluster)).await?;
    apply_resource::<PodDisruptionBudget>(ctx, ns, &pdb::generate_pdb(cluster, &quorum)).await?;
    apply_resource::<ConfigMap>(ctx, ns, &config::generate_config_map(cluster, &quorum)).await?;
    Ok(())
}

/// Perform one rollout change
async fn apply_change(
    cluster: &Elasticsearch,
    ctx: &Context,
    ns: &str,
    plan: &TopologyPlan,
    change: &PlannedChange,
) -> Result<()> {
    match change.kind {
        ChangeKind::Delete => {
            let api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), ns);
            match api.delete(&change.workload, &DeleteParams::background()).await {
                Ok(_) => Ok(()),
                Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
        ChangeKind::Create | ChangeKind::Update | ChangeKind::Restart => {
            let descriptor = plan.get(&change.workload).ok_or_else(|| {
                Error::TransientError(format!("{} is no longer planned", change.workload))
            })?;
            apply_resource(ctx, ns, &workload::generate_statefulset(cluster, descriptor)).await
        }
    }
}

async fn observe_workloads(api: &Api<StatefulSet>, cluster: &str) -> Result<Vec<LiveWorkload>> {
    let list = api
        .list(&ListParams::default().labels(&cluster_selector(cluster)))
        .await?;
    Ok(list.items.iter().filter_map(workload::observe).collect())
}

/// Desired and ready node counts per spec pool
fn pool_statuses(cluster: &Elasticsearch, plan: &TopologyPlan, live: &[LiveWorkload]) -> Vec<NodePoolStatus> {
    cluster
        .spec
        .nodes
        .iter()
        .map(|pool| NodePoolStatus {
            name: pool.name.clone(),
            roles: pool.roles.clone(),
            generation: plan.generations.get(&pool.name).cloned().unwrap_or_default(),
            desired: pool.node_count.max(0),
            ready: live.iter().filter(|w| w.pool == pool.name && w.ready).count() as i32,
        })
        .collect()
}

/// Pool counts when no plan is available
fn live_pool_statuses(cluster: &Elasticsearch, live: &[LiveWorkload]) -> Vec<NodePoolStatus> {
    cluster
        .spec
        .nodes
        .iter()
        .map(|pool| NodePoolStatus {
            name: pool.name.clone(),
            roles: pool.roles.clone(),
            generation: live
                .iter()
                .filter(|w| w.pool == pool.name)
                .min_by_key(|w| w.ordinal)
                .map(|w| w.generation.clone())
                .unwrap_or_default(),
            desired: pool.node_count.max(0),
            ready: live.iter().filter(|w| w.pool == pool.name && w.ready).count() as i32,
        })
        .collect()
}

/// Apply a Kubernetes resource using server-side apply
async fn apply_resource<T>(ctx: &Context, ns: &str, resource: &T) -> Result<()>
where
    T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Serialize
        + DeserializeOwned
        + Clone
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(ctx.client.clone(), ns);
    let name = resource.name_any();

    api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(resource))
        .await?;
    debug!(%name, "Applied resource");
    Ok(())
}

/// Check if the finalizer is present
fn has_finalizer(cluster: &Elasticsearch) -> bool {
    cluster
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|name| name == FINALIZER))
}

async fn add_finalizer(cluster: &Elasticsearch, ctx: &Context, ns: &str) -> Result<()> {
    let api: Api<Elasticsearch> = Api::namespaced(ctx.client.clone(), ns);
    let name = cluster.name_any();

    let mut finalizers = cluster.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    });

    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    info!(%name, "Added finalizer");
    Ok(())
}

/// Drop the rollout and release the resource. Owned objects are garbage
/// collected through their owner references.
async fn handle_deletion(cluster: &Elasticsearch, ctx: &Context, ns: &str) -> Result<Action> {
    let name = cluster.name_any();
    info!(%name, "Handling deletion");

    let rollout = cluster
        .status
        .as_ref()
        .map(|s| s.rollout.clone())
        .unwrap_or_default();
    let decision = Sequencer::new(ctx.config.rollout.clone()).cancel(&rollout);
    if let Err(e) = StatusManager::new(cluster, ctx, ns)
        .set_deleting(decision.state)
        .await
    {
        debug!(error = %e, "Could not record deletion in status");
    }

    if let Some(state) = &ctx.health_state {
        state.metrics.forget_cluster(ns, &name);
    }
    ctx.reset_errors(&format!("{}/{}", ns, name));

    if has_finalizer(cluster) {
        let api: Api<Elasticsearch> = Api::namespaced(ctx.client.clone(), ns);
        let remaining: Vec<String> = cluster
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != FINALIZER)
            .cloned()
            .collect();
        let patch = if remaining.is_empty() {
            serde_json::json!({ "metadata": { "finalizers": null } })
        } else {
            serde_json::json!({ "metadata": { "finalizers": remaining } })
        };

        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(%name, "Removed finalizer");
    }

    Ok(Action::await_change())
}
