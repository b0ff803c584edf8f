//! mTLS client for the Elasticsearch administrative API

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::pki::CertificateBundle;

/// REST port of the cluster service
pub const REST_PORT: u16 = 9200;

/// Errors talking to the administrative API
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build admin client: {0}")]
    Build(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{method} {path} returned {status}: {body}")]
    Status {
        method: &'static str,
        path: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from {path}: {message}")]
    Decode { path: String, message: String },
}

impl ClientError {
    /// Connectivity problems and overload responses that may clear on their own
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            ClientError::Status { status, .. } => *status == 429 || *status >= 500,
            ClientError::Build(_) | ClientError::Decode { .. } => false,
        }
    }
}

/// Response of `GET /_cluster/health`
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub cluster_name: String,
    pub status: String,
    #[serde(default)]
    pub number_of_nodes: u32,
    #[serde(default)]
    pub number_of_data_nodes: u32,
    #[serde(default)]
    pub unassigned_shards: u32,
}

/// One row of `GET /_cat/nodes?format=json`
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct CatNode {
    pub name: String,
    /// Role letters, e.g. `mdi`
    #[serde(rename = "node.role", default)]
    pub node_role: String,
    /// `*` on the elected master, `-` elsewhere
    #[serde(default)]
    pub master: String,
}

/// Calls the health prober and sequencer rely on
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn cluster_health(&self) -> Result<HealthResponse, ClientError>;

    async fn cat_nodes(&self) -> Result<Vec<CatNode>, ClientError>;

    /// `PUT` a JSON body to `path`
    async fn put_json(&self, path: &str, body: &Value) -> Result<(), ClientError>;
}

/// Administrative API client authenticating with the admin identity
#[derive(Clone)]
pub struct AdminClient {
    http: reqwest::Client,
    base_url: String,
}

impl AdminClient {
    /// Build a client trusting `ca_pem` and presenting `identity_pem`
    /// (certificate followed by key).
    pub fn new(
        base_url: impl Into<String>,
        ca_pem: &str,
        identity_pem: &str,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let ca = reqwest::Certificate::from_pem(ca_pem.as_bytes())
            .map_err(|e| ClientError::Build(format!("invalid CA certificate: {}", e)))?;
        let identity = reqwest::Identity::from_pem(identity_pem.as_bytes())
            .map_err(|e| ClientError::Build(format!("invalid admin identity: {}", e)))?;

        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .add_root_certificate(ca)
            .identity(identity)
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Client for the cluster service of `cluster` using the admin bundle
    pub fn for_cluster(
        cluster: &str,
        namespace: &str,
        admin: &CertificateBundle,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        Self::new(
            cluster_endpoint(cluster, namespace),
            &admin.ca_cert_pem,
            &admin.identity_pem(),
            timeout,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "GET");
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                method: "GET",
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        response.json().await.map_err(|e| ClientError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ClusterApi for AdminClient {
    async fn cluster_health(&self) -> Result<HealthResponse, ClientError> {
        self.get_json("/_cluster/health").await
    }

    async fn cat_nodes(&self) -> Result<Vec<CatNode>, ClientError> {
        self.get_json("/_cat/nodes?format=json&h=name,node.role,master")
            .await
    }

    async fn put_json(&self, path: &str, body: &Value) -> Result<(), ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "PUT");
        let response = self.http.put(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                method: "PUT",
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// `https://<cluster>.<namespace>.svc:9200`
pub fn cluster_endpoint(cluster: &str, namespace: &str) -> String {
    format!(
        "https://{}.{}.svc:{}",
        crate::resources::cluster_service_name(cluster),
        namespace,
        REST_PORT
    )
}
