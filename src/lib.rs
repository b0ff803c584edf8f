pub mod config;
pub mod controller;
pub mod crd;
pub mod elasticsearch;
pub mod health;
pub mod pki;
pub mod resources;
pub mod topology;

pub use config::{OperatorConfig, RolloutPolicy};
pub use controller::{BackoffConfig, Context, Error, FINALIZER, Result, error_policy, reconcile};
pub use crd::Elasticsearch;
pub use health::{HealthState, Metrics};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

type ControllerResult = std::result::Result<
    (kube::runtime::reflector::ObjectRef<Elasticsearch>, kube::runtime::controller::Action),
    kube::runtime::controller::Error<Error, kube::runtime::watcher::Error>,
>;

/// `Api` over one namespace, or every namespace when `namespace` is `None`
fn api_in<T>(client: &Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    namespace.map_or_else(
        || Api::all(client.clone()),
        |ns| Api::namespaced(client.clone(), ns),
    )
}

/// Log the outcome of one reconcile. Owned objects can still produce events
/// after their cluster is gone; those 404s are expected and logged at debug.
async fn log_outcome(result: ControllerResult) {
    match result {
        Ok((cluster, action)) => tracing::debug!(cluster = %cluster, ?action, "Reconciled"),
        Err(kube::runtime::controller::Error::ReconcilerFailed(err, cluster))
            if err.is_not_found() =>
        {
            tracing::debug!(cluster = %cluster, error = %err, "Cluster no longer exists")
        }
        Err(e) => tracing::error!(error = ?e, "Reconciliation failed"),
    }
}

/// Run the Elasticsearch controller until its watch stream ends.
///
/// Besides `Elasticsearch` resources it watches every kind the operator
/// creates for a cluster, so workload status changes (pods becoming ready)
/// drive rollout progress without waiting for a requeue. Metrics are recorded
/// when `health_state` is given.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
) {
    let namespace = config.watch_namespace.clone();
    let namespace = namespace.as_deref();
    tracing::info!(
        scope = namespace.unwrap_or("cluster-wide"),
        "Starting Elasticsearch controller"
    );

    if let Some(state) = &health_state {
        state.set_ready(true);
    }

    let watched = WatcherConfig::default().any_semantic();
    let controller = Controller::new(api_in::<Elasticsearch>(&client, namespace), watched.clone())
        .owns(api_in::<StatefulSet>(&client, namespace), watched.clone())
        .owns(api_in::<Service>(&client, namespace), watched.clone())
        .owns(api_in::<ConfigMap>(&client, namespace), watched.clone())
        .owns(api_in::<Secret>(&client, namespace), watched.clone())
        .owns(api_in::<PodDisruptionBudget>(&client, namespace), watched);

    let ctx = Arc::new(Context::new(client, config, health_state));
    controller
        .run(reconcile, error_policy, ctx)
        .for_each(log_outcome)
        .await;

    tracing::error!("Controller stream ended unexpectedly");
}
