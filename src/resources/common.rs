//! Common utilities for Kubernetes resource generation
//!
//! Shared constants, owner references and labels used by every generator.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::Elasticsearch;
use crate::topology::{RoleSet, WorkloadDescriptor};

/// API version for the Elasticsearch CRD
pub const API_VERSION: &str = "logging.openshift.io/v1";

/// Kind for the Elasticsearch CRD
pub const KIND: &str = "Elasticsearch";

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "elasticsearch-operator";

/// Label carrying the owning cluster's name
pub const CLUSTER_LABEL: &str = "logging.openshift.io/cluster";
/// Label carrying the node pool name
pub const POOL_LABEL: &str = "logging.openshift.io/node-pool";
/// Label carrying the role class tag (`cdm`, `m`, ...)
pub const ROLE_CLASS_LABEL: &str = "logging.openshift.io/role-class";
/// Label present on master-eligible pods, selected by the disruption budget
pub const MASTER_LABEL: &str = "logging.openshift.io/es-master";

/// Workload annotations recording what was rendered
pub mod annotations {
    pub const POOL: &str = "logging.openshift.io/pool";
    pub const ROLES: &str = "logging.openshift.io/roles";
    pub const ORDINAL: &str = "logging.openshift.io/ordinal";
    pub const GENERATION: &str = "logging.openshift.io/generation";
    pub const FINGERPRINT: &str = "logging.openshift.io/fingerprint";
    pub const CERT_VERSION: &str = "logging.openshift.io/cert-version";
}

/// Owner reference so child resources are garbage collected with the cluster
pub fn owner_reference(cluster: &Elasticsearch) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Labels on every resource belonging to a cluster
pub fn standard_labels(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "app.kubernetes.io/name".to_string(),
            cluster_name.to_string(),
        ),
        (
            "app.kubernetes.io/component".to_string(),
            "elasticsearch".to_string(),
        ),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
        (CLUSTER_LABEL.to_string(), cluster_name.to_string()),
    ])
}

/// Selector matching every workload of a cluster
pub fn cluster_selector(cluster_name: &str) -> String {
    format!("{}={}", CLUSTER_LABEL, cluster_name)
}

/// Labels on a workload and its pod. The master label is only present on
/// master-eligible pods.
pub fn workload_labels(descriptor: &WorkloadDescriptor) -> BTreeMap<String, String> {
    let mut labels = standard_labels(&descriptor.cluster);
    labels.insert(POOL_LABEL.to_string(), descriptor.pool.clone());
    labels.insert(
        ROLE_CLASS_LABEL.to_string(),
        descriptor.roles.class_tag().to_string(),
    );
    labels.extend(role_labels(descriptor.roles));
    labels
}

fn role_labels(roles: RoleSet) -> BTreeMap<String, String> {
    roles
        .roles()
        .into_iter()
        .map(|role| (format!("logging.openshift.io/es-{}", role), "true".to_string()))
        .collect()
}
