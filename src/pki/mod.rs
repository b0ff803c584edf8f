//! In-process PKI for cluster mutual TLS
//!
//! Every cluster gets its own certificate authority, generated once and kept
//! in `<cluster>-ca`. Leaf bundles are issued per identity and stored one
//! secret per identity:
//!
//! | Identity        | Secret                           | Used by                          |
//! |-----------------|----------------------------------|----------------------------------|
//! | Node            | `<cluster>-node-tls`             | transport, REST and metrics      |
//! | Admin           | `<cluster>-admin-tls`            | the operator's admin API client  |
//! | DashboardProxy  | `<cluster>-dashboard-proxy-tls`  | the dashboard's proxy            |
//!
//! Rotation writes a new version into the same secret and keeps the previous
//! key/certificate alongside it until the dependent rollout completes.

mod authority;
mod bundle;
mod manager;
mod store;

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use x509_parser::prelude::*;

pub use authority::{CA_VALIDITY_DAYS, CertificateAuthority};
pub use bundle::{
    CA_CERT_KEY, CertificateBundle, PreviousBundle, TLS_CERT_KEY, TLS_KEY_KEY, versioned_key,
};
pub use manager::{CertificateManager, expiring_soon};
pub use store::{KubeSecretStore, MemorySecretStore, SecretStore};

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Writing a secret failed; the caller retries the pass
    #[error("failed to persist {secret}: {message}")]
    Persistence { secret: String, message: String },

    /// Reading a secret failed
    #[error("failed to read {secret}: {message}")]
    StoreUnavailable { secret: String, message: String },

    /// The stored CA cannot be used and must be repaired by hand
    #[error("certificate authority {secret} is corrupt: {message}")]
    CaCorruption { secret: String, message: String },

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Certificate generation or signing failed
    #[error("certificate generation failed: {0}")]
    CertificateGeneration(String),

    /// Certificate parsing error
    #[error("certificate parsing error: {0}")]
    Parse(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Holder of a leaf certificate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identity {
    /// Elasticsearch nodes: transport, REST and metrics
    Node,
    /// The operator's administrative client
    Admin,
    /// The dashboard's authenticating proxy
    DashboardProxy,
}

impl Identity {
    pub const ALL: [Identity; 3] = [Identity::Node, Identity::Admin, Identity::DashboardProxy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Identity::Node => "node",
            Identity::Admin => "admin",
            Identity::DashboardProxy => "dashboard-proxy",
        }
    }

    /// Deterministic secret name for this identity's bundle
    pub fn secret_name(&self, cluster: &str) -> String {
        format!("{}-{}-tls", cluster, self.as_str())
    }

    pub fn common_name(&self, cluster: &str) -> String {
        match self {
            Identity::Node => format!("{}.elasticsearch", cluster),
            Identity::Admin => "system.admin".to_string(),
            Identity::DashboardProxy => "system.logging.dashboard".to_string(),
        }
    }

    /// DNS names the certificate is valid for
    pub fn subject_alt_names(&self, cluster: &str, namespace: &str) -> Vec<String> {
        let service = crate::resources::cluster_service_name(cluster);
        let discovery = crate::resources::discovery_service_name(cluster);
        match self {
            Identity::Node => vec![
                service.clone(),
                format!("{}.{}.svc", service, namespace),
                format!("{}.{}.svc.cluster.local", service, namespace),
                discovery.clone(),
                format!("{}.{}.svc", discovery, namespace),
                format!("*.{}.{}.svc", discovery, namespace),
                format!("*.{}.{}.svc.cluster.local", discovery, namespace),
                "localhost".to_string(),
                "127.0.0.1".to_string(),
            ],
            Identity::Admin => vec![self.common_name(cluster)],
            Identity::DashboardProxy => vec![
                format!("{}-dashboard", cluster),
                format!("{}-dashboard.{}.svc", cluster, namespace),
            ],
        }
    }

    /// Node and proxy certificates also terminate TLS
    pub fn serves_tls(&self) -> bool {
        !matches!(self, Identity::Admin)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secret name of the cluster's certificate authority
pub fn ca_secret_name(cluster: &str) -> String {
    format!("{}-ca", cluster)
}

/// Validity window of a certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub common_name: String,
}

impl CertificateInfo {
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let der = parse_pem(pem_data)?;
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| PkiError::Parse(format!("failed to parse certificate: {}", e)))?;

        let not_before = timestamp(cert.validity().not_before.timestamp())?;
        let not_after = timestamp(cert.validity().not_after.timestamp())?;
        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        Ok(Self {
            not_before,
            not_after,
            common_name,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.not_after
    }

    /// Whether the certificate expires before `now + horizon`
    pub fn expires_within(&self, horizon: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.not_after <= now + horizon
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| PkiError::Parse(format!("timestamp {} out of range", secs)))
}

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::Parse(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}
