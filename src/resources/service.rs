//! Services fronting the cluster
//!
//! - `<cluster>`: REST API on 9200 across all nodes, used by clients and the
//!   operator's health probe
//! - `<cluster>-cluster`: headless transport service on 9300 over
//!   master-eligible pods, used for discovery

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::Elasticsearch;
use crate::resources::common::{CLUSTER_LABEL, MASTER_LABEL, owner_reference, standard_labels};
use crate::resources::workload::{REST_PORT, TRANSPORT_PORT};

pub fn cluster_service_name(cluster: &str) -> String {
    cluster.to_string()
}

pub fn discovery_service_name(cluster: &str) -> String {
    format!("{}-cluster", cluster)
}

/// REST service over every node of the cluster
pub fn generate_cluster_service(cluster: &Elasticsearch) -> Service {
    let cluster_name = cluster.name_any();
    let selector = BTreeMap::from([(CLUSTER_LABEL.to_string(), cluster_name.clone())]);

    Service {
        metadata: metadata(cluster, cluster_service_name(&cluster_name)),
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(vec![port("restapi", REST_PORT)]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Headless transport service over master-eligible nodes. Not-ready pods are
/// published so a forming cluster can find its masters.
pub fn generate_discovery_service(cluster: &Elasticsearch) -> Service {
    let cluster_name = cluster.name_any();
    let selector = BTreeMap::from([
        (CLUSTER_LABEL.to_string(), cluster_name.clone()),
        (MASTER_LABEL.to_string(), "true".to_string()),
    ]);

    Service {
        metadata: metadata(cluster, discovery_service_name(&cluster_name)),
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(vec![port("cluster", TRANSPORT_PORT)]),
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn metadata(cluster: &Elasticsearch, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: cluster.namespace(),
        labels: Some(standard_labels(&cluster.name_any())),
        owner_references: Some(vec![owner_reference(cluster)]),
        ..Default::default()
    }
}

fn port(name: &str, number: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port: number,
        target_port: Some(IntOrString::Int(number)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}
