//! Health server for Kubernetes probes and Prometheus metrics
//!
//! Provides HTTP endpoints for:
//! - `/healthz` - Liveness probe (is the process alive?)
//! - `/readyz` - Readiness probe (is the operator ready to serve?)
//! - `/metrics` - Prometheus metrics

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use chrono::{DateTime, Utc};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use crate::crd::{ClusterHealth, ClusterPhase};

/// Identifies one Elasticsearch cluster in per-cluster metric families
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterLabels {
    pub namespace: String,
    pub name: String,
}

impl ClusterLabels {
    fn of(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PhaseLabels {
    pub phase: String,
}

/// A cluster plus the change kind or deferral reason of a rollout step
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StepLabels {
    pub namespace: String,
    pub name: String,
    pub kind: String,
}

const PHASES: [ClusterPhase; 7] = [
    ClusterPhase::Pending,
    ClusterPhase::Running,
    ClusterPhase::RollingOut,
    ClusterPhase::Degraded,
    ClusterPhase::Paused,
    ClusterPhase::Failed,
    ClusterPhase::Deleting,
];

/// Shared metrics state
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<ClusterLabels, Counter>,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Family<ClusterLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ClusterLabels, Histogram>,

    // Fleet metrics
    /// Total clusters by phase
    pub clusters_total: Family<PhaseLabels, Gauge>,
    /// Cluster health per cluster: 0 unknown, 1 red, 2 yellow, 3 green
    pub cluster_health: Family<ClusterLabels, Gauge>,
    /// Desired nodes per cluster
    pub cluster_nodes_desired: Family<ClusterLabels, Gauge>,
    /// Ready nodes per cluster
    pub cluster_nodes_ready: Family<ClusterLabels, Gauge>,
    /// Unix time of the last reconcile pass that returned without error
    pub last_success_timestamp_seconds: Family<ClusterLabels, Gauge>,

    // Rollout metrics
    /// Workload changes applied, by change kind
    pub rollout_steps_total: Family<StepLabels, Counter>,
    /// Guarded changes deferred, by reason
    pub rollout_deferrals_total: Family<StepLabels, Counter>,

    /// Last known phase per cluster, used to derive `clusters_total`
    phases: Mutex<HashMap<(String, String), ClusterPhase>>,

    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ClusterLabels, Counter>::default();
        registry.register(
            "elasticsearch_operator_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ClusterLabels, Counter>::default();
        registry.register(
            "elasticsearch_operator_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ClusterLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "elasticsearch_operator_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        // Fleet metrics
        let clusters_total = Family::<PhaseLabels, Gauge>::default();
        registry.register(
            "elasticsearch_operator_clusters_total",
            "Total number of Elasticsearch clusters by phase",
            clusters_total.clone(),
        );

        let cluster_health = Family::<ClusterLabels, Gauge>::default();
        registry.register(
            "elasticsearch_operator_cluster_health",
            "Cluster health (0 unknown, 1 red, 2 yellow, 3 green)",
            cluster_health.clone(),
        );

        let cluster_nodes_desired = Family::<ClusterLabels, Gauge>::default();
        registry.register(
            "elasticsearch_operator_cluster_nodes_desired",
            "Desired number of nodes for each cluster",
            cluster_nodes_desired.clone(),
        );

        let cluster_nodes_ready = Family::<ClusterLabels, Gauge>::default();
        registry.register(
            "elasticsearch_operator_cluster_nodes_ready",
            "Number of ready nodes for each cluster",
            cluster_nodes_ready.clone(),
        );

        let last_success_timestamp_seconds = Family::<ClusterLabels, Gauge>::default();
        registry.register(
            "elasticsearch_operator_last_success_timestamp_seconds",
            "Unix time of the last successful reconcile of each cluster",
            last_success_timestamp_seconds.clone(),
        );

        let rollout_steps_total = Family::<StepLabels, Counter>::default();
        registry.register(
            "elasticsearch_operator_rollout_steps",
            "Workload changes applied by the rollout sequencer",
            rollout_steps_total.clone(),
        );

        let rollout_deferrals_total = Family::<StepLabels, Counter>::default();
        registry.register(
            "elasticsearch_operator_rollout_deferrals",
            "Guarded workload changes deferred by quorum or health gates",
            rollout_deferrals_total.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            clusters_total,
            cluster_health,
            cluster_nodes_desired,
            cluster_nodes_ready,
            last_success_timestamp_seconds,
            rollout_steps_total,
            rollout_deferrals_total,
            phases: Mutex::new(HashMap::new()),
            registry,
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ClusterLabels::of(namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        let labels = ClusterLabels::of(namespace, name);
        self.reconciliation_errors_total
            .get_or_create(&labels)
            .inc();
    }

    /// Record the phase of one cluster and refresh the per-phase totals
    pub fn set_cluster_phase(&self, namespace: &str, name: &str, phase: ClusterPhase) {
        let mut phases = self.phases.lock().unwrap_or_else(|p| p.into_inner());
        phases.insert((namespace.to_string(), name.to_string()), phase);
        self.refresh_phase_totals(&phases);
    }

    /// Drop a deleted cluster from the fleet metrics
    pub fn forget_cluster(&self, namespace: &str, name: &str) {
        let mut phases = self.phases.lock().unwrap_or_else(|p| p.into_inner());
        phases.remove(&(namespace.to_string(), name.to_string()));
        self.refresh_phase_totals(&phases);

        let labels = ClusterLabels::of(namespace, name);
        self.cluster_health.remove(&labels);
        self.cluster_nodes_desired.remove(&labels);
        self.cluster_nodes_ready.remove(&labels);
        self.last_success_timestamp_seconds.remove(&labels);
    }

    pub fn record_success(&self, namespace: &str, name: &str, at: DateTime<Utc>) {
        self.last_success_timestamp_seconds
            .get_or_create(&ClusterLabels::of(namespace, name))
            .set(at.timestamp());
    }

    fn refresh_phase_totals(&self, phases: &HashMap<(String, String), ClusterPhase>) {
        for phase in PHASES {
            let count = phases.values().filter(|p| **p == phase).count() as i64;
            self.clusters_total
                .get_or_create(&PhaseLabels {
                    phase: phase.to_string(),
                })
                .set(count);
        }
    }

    /// Update observed health and node counts of a cluster
    pub fn set_cluster_state(
        &self,
        namespace: &str,
        name: &str,
        health: ClusterHealth,
        desired: i64,
        ready: i64,
    ) {
        let labels = ClusterLabels::of(namespace, name);
        self.cluster_health.get_or_create(&labels).set(health as i64);
        self.cluster_nodes_desired
            .get_or_create(&labels)
            .set(desired);
        self.cluster_nodes_ready
            .get_or_create(&labels)
            .set(ready);
    }

    pub fn record_step(&self, namespace: &str, name: &str, kind: &str) {
        self.rollout_steps_total
            .get_or_create(&StepLabels {
                namespace: namespace.to_string(),
                name: name.to_string(),
                kind: kind.to_string(),
            })
            .inc();
    }

    pub fn record_deferral(&self, namespace: &str, name: &str, reason: &str) {
        self.rollout_deferrals_total
            .get_or_create(&StepLabels {
                namespace: namespace.to_string(),
                name: name.to_string(),
                kind: reason.to_string(),
            })
            .inc();
    }

    /// Render the registry in the Prometheus text exposition format
    fn render(&self) -> String {
        let mut body = String::new();
        match encode(&mut body, &self.registry) {
            Ok(()) => body,
            Err(e) => {
                tracing::error!(error = %e, "Metrics encoding failed");
                String::new()
            }
        }
    }
}

/// State shared between the controller and the probe endpoints
pub struct HealthState {
    ready: AtomicBool,
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            metrics: Metrics::new(),
        }
    }

    /// Flipped on once the controller starts watching and off on shutdown
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

async fn readyz(State(state): State<Arc<HealthState>>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_TEXT)],
        state.metrics.render(),
    )
}

/// Routes for the liveness probe (`/healthz`), the readiness probe
/// (`/readyz`) and the Prometheus scrape endpoint (`/metrics`)
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the probe and metrics endpoints on `addr` until the listener fails
pub async fn run_health_server(
    state: Arc<HealthState>,
    addr: SocketAddr,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Health server listening");
    axum::serve(listener, create_router(state)).await
}
