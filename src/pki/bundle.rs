use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::{CertificateInfo, Identity, PkiError, Result};

pub const CA_CERT_KEY: &str = "ca.crt";
pub const CA_KEY_KEY: &str = "ca.key";
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";
pub const VERSION_KEY: &str = "version";
pub const PREVIOUS_CERT_KEY: &str = "previous.crt";
pub const PREVIOUS_KEY_KEY: &str = "previous.key";
pub const PREVIOUS_VERSION_KEY: &str = "previous.version";

/// Secret key holding `key` of one bundle version, e.g. `v3-tls.crt`.
/// Pod templates project these so a node keeps its version until restarted.
pub fn versioned_key(version: u32, key: &str) -> String {
    format!("v{}-{}", version, key)
}

/// Key and certificate superseded by a rotation, kept until released
#[derive(Clone, PartialEq, Eq)]
pub struct PreviousBundle {
    pub version: u32,
    pub cert_pem: String,
    pub key_pem: String,
}

impl std::fmt::Debug for PreviousBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviousBundle")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// CA certificate plus one identity's key and certificate
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub identity: Identity,
    /// Monotonic version, bumped on every regeneration
    pub version: u32,
    pub ca_cert_pem: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub not_after: DateTime<Utc>,
    pub previous: Option<PreviousBundle>,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("identity", &self.identity)
            .field("version", &self.version)
            .field("not_after", &self.not_after)
            .field("previous", &self.previous)
            .finish_non_exhaustive()
    }
}

impl CertificateBundle {
    /// Build a bundle from freshly issued material
    pub fn new(
        identity: Identity,
        version: u32,
        ca_cert_pem: &str,
        cert_pem: String,
        key_pem: String,
        previous: Option<PreviousBundle>,
    ) -> Result<Self> {
        let info = CertificateInfo::from_pem(&cert_pem)?;
        Ok(Self {
            identity,
            version,
            ca_cert_pem: ca_cert_pem.to_string(),
            cert_pem,
            key_pem,
            not_after: info.not_after,
            previous,
        })
    }

    /// Decode the secret data written by [`CertificateBundle::to_data`]
    pub fn from_data(identity: Identity, data: &BTreeMap<String, String>) -> Result<Self> {
        let field = |key: &str| {
            data.get(key)
                .cloned()
                .ok_or_else(|| PkiError::Parse(format!("{} bundle is missing {}", identity, key)))
        };
        let version = parse_version(&field(VERSION_KEY)?)?;

        let previous = match (
            data.get(PREVIOUS_CERT_KEY),
            data.get(PREVIOUS_KEY_KEY),
            data.get(PREVIOUS_VERSION_KEY),
        ) {
            (Some(cert_pem), Some(key_pem), Some(version)) => Some(PreviousBundle {
                version: parse_version(version)?,
                cert_pem: cert_pem.clone(),
                key_pem: key_pem.clone(),
            }),
            _ => None,
        };

        Self::new(
            identity,
            version,
            &field(CA_CERT_KEY)?,
            field(TLS_CERT_KEY)?,
            field(TLS_KEY_KEY)?,
            previous,
        )
    }

    /// Secret data for this bundle; the previous slot is omitted once released
    pub fn to_data(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::from([
            (CA_CERT_KEY.to_string(), self.ca_cert_pem.clone()),
            (TLS_CERT_KEY.to_string(), self.cert_pem.clone()),
            (TLS_KEY_KEY.to_string(), self.key_pem.clone()),
            (VERSION_KEY.to_string(), self.version.to_string()),
            (versioned_key(self.version, TLS_CERT_KEY), self.cert_pem.clone()),
            (versioned_key(self.version, TLS_KEY_KEY), self.key_pem.clone()),
        ]);
        if let Some(previous) = &self.previous {
            data.insert(PREVIOUS_CERT_KEY.to_string(), previous.cert_pem.clone());
            data.insert(PREVIOUS_KEY_KEY.to_string(), previous.key_pem.clone());
            data.insert(PREVIOUS_VERSION_KEY.to_string(), previous.version.to_string());
            data.insert(versioned_key(previous.version, TLS_CERT_KEY), previous.cert_pem.clone());
            data.insert(versioned_key(previous.version, TLS_KEY_KEY), previous.key_pem.clone());
        }
        data
    }

    pub fn info(&self) -> Result<CertificateInfo> {
        CertificateInfo::from_pem(&self.cert_pem)
    }

    /// Concatenated certificate and key, as reqwest's identity loader expects
    pub fn identity_pem(&self) -> String {
        format!("{}\n{}", self.cert_pem.trim_end(), self.key_pem)
    }
}

fn parse_version(value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| PkiError::Parse(format!("invalid bundle version {:?}", value)))
}
