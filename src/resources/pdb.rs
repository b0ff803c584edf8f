//! PodDisruptionBudget over master-eligible pods
//!
//! Voluntary disruptions (node drains, evictions) may not take the number of
//! available masters below quorum.

use std::collections::BTreeMap;

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::Elasticsearch;
use crate::resources::common::{CLUSTER_LABEL, MASTER_LABEL, owner_reference, standard_labels};
use crate::topology::QuorumRequirement;

pub fn pdb_name(cluster: &str) -> String {
    format!("{}-master", cluster)
}

/// Generate the master PodDisruptionBudget with `minAvailable` set to quorum
pub fn generate_pdb(cluster: &Elasticsearch, quorum: &QuorumRequirement) -> PodDisruptionBudget {
    let cluster_name = cluster.name_any();
    let match_labels = BTreeMap::from([
        (CLUSTER_LABEL.to_string(), cluster_name.clone()),
        (MASTER_LABEL.to_string(), "true".to_string()),
    ]);

    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(pdb_name(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            min_available: Some(IntOrString::Int(quorum.quorum as i32)),
            selector: Some(LabelSelector {
                match_labels: Some(match_labels),
                ..Default::default()
            }),
            // Use IfHealthyBudget to allow eviction if pod is unhealthy
            unhealthy_pod_eviction_policy: Some("IfHealthyBudget".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
