//! Per-node StatefulSets
//!
//! Every [`WorkloadDescriptor`] becomes one StatefulSet with a single
//! replica. Its annotations record what was rendered so the live topology can
//! be reconstructed from the API server alone.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    KeyToPath, ObjectFieldSelector, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SecretVolumeSource, SecurityContext,
    TCPSocketAction, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;

use crate::crd::{self, Elasticsearch, NodeRole};
use crate::pki::{CA_CERT_KEY, TLS_CERT_KEY, TLS_KEY_KEY, versioned_key};
use crate::resources::common::{CLUSTER_LABEL, annotations, owner_reference, workload_labels};
use crate::resources::config::config_map_name;
use crate::resources::service::discovery_service_name;
use crate::topology::{LiveWorkload, RoleSet, WorkloadDescriptor};

/// Label selecting the single pod of a workload
pub const WORKLOAD_LABEL: &str = "logging.openshift.io/workload";

pub const REST_PORT: i32 = 9200;
pub const TRANSPORT_PORT: i32 = 9300;

const DATA_PATH: &str = "/elasticsearch/persistent";
const CONFIG_PATH: &str = "/usr/share/elasticsearch/config/operator";
const CERT_PATH: &str = "/etc/elasticsearch/secret";

/// Project the key pair of bundle `version` as `tls.crt`/`tls.key`. The
/// template only changes when a rollout step restarts the node, so every pod
/// keeps the pair it started with. Version 0 means no bundle is known yet.
fn certificate_items(version: u32) -> Option<Vec<KeyToPath>> {
    if version == 0 {
        return None;
    }
    let item = |key: String, path: &str| KeyToPath {
        key,
        path: path.to_string(),
        mode: None,
    };
    Some(vec![
        item(CA_CERT_KEY.to_string(), CA_CERT_KEY),
        item(versioned_key(version, TLS_CERT_KEY), TLS_CERT_KEY),
        item(versioned_key(version, TLS_KEY_KEY), TLS_KEY_KEY),
    ])
}

/// Render the StatefulSet for one descriptor
pub fn generate_statefulset(cluster: &Elasticsearch, descriptor: &WorkloadDescriptor) -> StatefulSet {
    let mut labels = workload_labels(descriptor);
    labels.insert(WORKLOAD_LABEL.to_string(), descriptor.name.clone());
    let selector = BTreeMap::from([
        (CLUSTER_LABEL.to_string(), descriptor.cluster.clone()),
        (WORKLOAD_LABEL.to_string(), descriptor.name.clone()),
    ]);
    let annotations = workload_annotations(descriptor);

    let container = Container {
        name: "elasticsearch".to_string(),
        image: Some(descriptor.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(vec![
            ContainerPort {
                container_port: REST_PORT,
                name: Some("restapi".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: TRANSPORT_PORT,
                name: Some("cluster".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        env: Some(env_vars(descriptor)),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "data".to_string(),
                mount_path: DATA_PATH.to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: "config".to_string(),
                mount_path: CONFIG_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: "certificates".to_string(),
                mount_path: CERT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        ]),
        resources: descriptor.resources.as_ref().map(resource_requirements),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(REST_PORT),
                ..Default::default()
            }),
            initial_delay_seconds: Some(10),
            period_seconds: Some(5),
            timeout_seconds: Some(30),
            ..Default::default()
        }),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut volumes = vec![
        Volume {
            name: "config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map_name(&descriptor.cluster),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "certificates".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(descriptor.tls_secret.clone()),
                items: certificate_items(descriptor.cert_version),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];
    let claims = match &descriptor.storage {
        Some(storage) => Some(vec![volume_claim(storage)]),
        None => {
            volumes.push(Volume {
                name: "data".to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            });
            None
        }
    };

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(descriptor.name.clone()),
            namespace: cluster.metadata.namespace.clone(),
            labels: Some(labels.clone()),
            annotations: Some(annotations.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: Some(discovery_service_name(&descriptor.cluster)),
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    // the certificate version lives on the pod template so a
                    // bump restarts the pod
                    annotations: Some(annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    termination_grace_period_seconds: Some(120),
                    ..Default::default()
                }),
            },
            volume_claim_templates: claims,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn workload_annotations(descriptor: &WorkloadDescriptor) -> BTreeMap<String, String> {
    BTreeMap::from([
        (annotations::POOL.to_string(), descriptor.pool.clone()),
        (annotations::ROLES.to_string(), descriptor.roles.annotation()),
        (annotations::ORDINAL.to_string(), descriptor.ordinal.to_string()),
        (annotations::GENERATION.to_string(), descriptor.generation.clone()),
        (annotations::FINGERPRINT.to_string(), descriptor.fingerprint()),
        (
            annotations::CERT_VERSION.to_string(),
            descriptor.cert_version.to_string(),
        ),
    ])
}

fn env_vars(descriptor: &WorkloadDescriptor) -> Vec<EnvVar> {
    let flag = |name: &str, role: NodeRole| EnvVar {
        name: name.to_string(),
        value: Some(descriptor.roles.contains(role).to_string()),
        ..Default::default()
    };
    vec![
        EnvVar {
            name: "NODE_NAME".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.name".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        EnvVar {
            name: "CLUSTER_NAME".to_string(),
            value: Some(descriptor.cluster.clone()),
            ..Default::default()
        },
        flag("IS_MASTER", NodeRole::Master),
        flag("HAS_DATA", NodeRole::Data),
        flag("INGEST", NodeRole::Client),
    ]
}

fn resource_requirements(resources: &crd::ResourceRequirements) -> ResourceRequirements {
    let quantities = |list: &crd::ResourceList| {
        let mut map = BTreeMap::new();
        if let Some(cpu) = &list.cpu {
            map.insert("cpu".to_string(), Quantity(cpu.clone()));
        }
        if let Some(memory) = &list.memory {
            map.insert("memory".to_string(), Quantity(memory.clone()));
        }
        map
    };
    ResourceRequirements {
        limits: resources.limits.as_ref().map(quantities),
        requests: resources.requests.as_ref().map(quantities),
        ..Default::default()
    }
}

fn volume_claim(storage: &crd::StorageSpec) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("data".to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: storage.storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(storage.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Reconstruct a live workload from its StatefulSet. Objects without the
/// operator's annotations are ignored.
pub fn observe(sts: &StatefulSet) -> Option<LiveWorkload> {
    let name = sts.metadata.name.clone()?;
    let annotations = sts.metadata.annotations.as_ref()?;
    let get = |key: &str| annotations.get(key).map(String::as_str);

    let roles = RoleSet::parse(get(annotations::ROLES)?)?;
    let ordinal = get(annotations::ORDINAL)?.parse().ok()?;
    let cert_version = get(annotations::CERT_VERSION)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    Some(LiveWorkload {
        name,
        pool: get(annotations::POOL)?.to_string(),
        roles,
        generation: get(annotations::GENERATION)?.to_string(),
        ordinal,
        fingerprint: get(annotations::FINGERPRINT).map(str::to_string),
        cert_version,
        ready: is_ready(sts),
    })
}

/// The pod runs the current template and is ready
fn is_ready(sts: &StatefulSet) -> bool {
    let Some(status) = &sts.status else {
        return false;
    };
    let generation = sts.metadata.generation.unwrap_or(0);
    let rolled = match (&status.current_revision, &status.update_revision) {
        (Some(current), Some(update)) => current == update,
        _ => true,
    };
    status.ready_replicas.unwrap_or(0) >= 1
        && rolled
        && status.observed_generation.unwrap_or(0) >= generation
}
