//! Secrets holding certificate material

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::Elasticsearch;
use crate::resources::common::{owner_reference, standard_labels};

/// Render a certificate secret. Values are written as `data` so that a
/// server-side apply replaces the whole key set, dropping keys no longer
/// present.
pub fn generate_tls_secret(
    cluster: &Elasticsearch,
    name: &str,
    data: BTreeMap<String, String>,
) -> Secret {
    let cluster_name = cluster.name_any();
    let data = data
        .into_iter()
        .map(|(k, v)| (k, ByteString(v.into_bytes())))
        .collect();

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// Secret content as UTF-8 strings. `stringData` wins over `data` for keys
/// present in both; undecodable values are skipped.
pub fn secret_string_data(secret: &Secret) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = secret
        .data
        .iter()
        .flatten()
        .filter_map(|(k, v)| String::from_utf8(v.0.clone()).ok().map(|v| (k.clone(), v)))
        .collect();
    if let Some(string_data) = &secret.string_data {
        out.extend(string_data.clone());
    }
    out
}
