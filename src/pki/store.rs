//! Persistence for certificate material

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use kube::api::{Patch, PatchParams};
use tokio::sync::Mutex;

use super::{PkiError, Result};
use crate::crd::Elasticsearch;
use crate::resources::common::FIELD_MANAGER;
use crate::resources::secret::{generate_tls_secret, secret_string_data};

/// Storage for secret data keyed by secret name.
///
/// A `save` replaces the whole object in one write, so readers observe either
/// the old or the new content.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn load(&self, name: &str) -> Result<Option<BTreeMap<String, String>>>;

    async fn save(&self, name: &str, data: BTreeMap<String, String>) -> Result<()>;
}

/// Secrets in the cluster's namespace, owned by the Elasticsearch resource
pub struct KubeSecretStore {
    api: Api<Secret>,
    cluster: Elasticsearch,
}

impl KubeSecretStore {
    pub fn new(api: Api<Secret>, cluster: &Elasticsearch) -> Self {
        Self {
            api,
            cluster: cluster.clone(),
        }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn load(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        let secret = self
            .api
            .get_opt(name)
            .await
            .map_err(|e| PkiError::StoreUnavailable {
                secret: name.to_string(),
                message: e.to_string(),
            })?;
        Ok(secret.map(|s| secret_string_data(&s)))
    }

    async fn save(&self, name: &str, data: BTreeMap<String, String>) -> Result<()> {
        let secret = generate_tls_secret(&self.cluster, name, data);
        self.api
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&secret),
            )
            .await
            .map_err(|e| PkiError::Persistence {
                secret: name.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

/// In-memory store for tests and dry runs
#[derive(Clone, Default)]
pub struct MemorySecretStore {
    secrets: Arc<Mutex<BTreeMap<String, BTreeMap<String, String>>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write to `name` fail
    pub async fn fail_writes_to(&self, name: &str) {
        self.failing.lock().await.insert(name.to_string());
    }

    /// Overwrite stored data directly, bypassing write failures
    pub async fn put(&self, name: &str, data: BTreeMap<String, String>) {
        self.secrets.lock().await.insert(name.to_string(), data);
    }

    pub async fn get(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.secrets.lock().await.get(name).cloned()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn load(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.secrets.lock().await.get(name).cloned())
    }

    async fn save(&self, name: &str, data: BTreeMap<String, String>) -> Result<()> {
        if self.failing.lock().await.contains(name) {
            return Err(PkiError::Persistence {
                secret: name.to_string(),
                message: "write rejected".to_string(),
            });
        }
        self.secrets.lock().await.insert(name.to_string(), data);
        Ok(())
    }
}
