//! Cluster configuration ConfigMap (`elasticsearch.yml`)

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::Elasticsearch;
use crate::resources::common::{owner_reference, standard_labels};
use crate::resources::service::discovery_service_name;
use crate::topology::QuorumRequirement;

pub fn config_map_name(cluster: &str) -> String {
    format!("{}-config", cluster)
}

/// Generate the configuration shared by every node of the cluster
pub fn generate_config_map(cluster: &Elasticsearch, quorum: &QuorumRequirement) -> ConfigMap {
    let cluster_name = cluster.name_any();
    let ns = cluster.namespace().unwrap_or_else(|| "default".to_string());

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_map_name(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "elasticsearch.yml".to_string(),
            elasticsearch_yml(&cluster_name, &ns, quorum),
        )])),
        ..Default::default()
    }
}

fn elasticsearch_yml(cluster: &str, ns: &str, quorum: &QuorumRequirement) -> String {
    let discovery = format!("{}.{}.svc", discovery_service_name(cluster), ns);
    let lines = [
        format!("cluster.name: {}", cluster),
        "node.name: ${NODE_NAME}".to_string(),
        "node.master: ${IS_MASTER}".to_string(),
        "node.data: ${HAS_DATA}".to_string(),
        "node.ingest: ${INGEST}".to_string(),
        "network.host: 0.0.0.0".to_string(),
        "path.data: /elasticsearch/persistent/${CLUSTER_NAME}/data".to_string(),
        format!("discovery.zen.ping.unicast.hosts: {}", discovery),
        format!("discovery.zen.minimum_master_nodes: {}", quorum.quorum),
        format!("gateway.expected_master_nodes: {}", quorum.masters),
        format!("gateway.recover_after_nodes: {}", quorum.quorum),
        "xpack.security.enabled: true".to_string(),
        "xpack.security.transport.ssl.enabled: true".to_string(),
        "xpack.security.transport.ssl.verification_mode: certificate".to_string(),
        "xpack.security.transport.ssl.key: /etc/elasticsearch/secret/tls.key".to_string(),
        "xpack.security.transport.ssl.certificate: /etc/elasticsearch/secret/tls.crt".to_string(),
        "xpack.security.transport.ssl.certificate_authorities: [/etc/elasticsearch/secret/ca.crt]"
            .to_string(),
        "xpack.security.http.ssl.enabled: true".to_string(),
        "xpack.security.http.ssl.client_authentication: required".to_string(),
        "xpack.security.http.ssl.key: /etc/elasticsearch/secret/tls.key".to_string(),
        "xpack.security.http.ssl.certificate: /etc/elasticsearch/secret/tls.crt".to_string(),
        "xpack.security.http.ssl.certificate_authorities: [/etc/elasticsearch/secret/ca.crt]"
            .to_string(),
    ];
    let mut yml = lines.join("\n");
    yml.push('\n');
    yml
}
