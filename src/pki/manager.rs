//! Certificate lifecycle: generation, storage, rotation

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::bundle::{CA_CERT_KEY, CA_KEY_KEY, VERSION_KEY};
use super::{
    CertificateAuthority, CertificateBundle, Identity, PkiError, PreviousBundle, Result,
    SecretStore, ca_secret_name,
};

/// Whether `bundle` expires within `horizon` of `now`
pub fn expiring_soon(bundle: &CertificateBundle, horizon: chrono::Duration, now: DateTime<Utc>) -> bool {
    bundle.not_after <= now + horizon
}

/// Owns every piece of TLS material of one cluster
pub struct CertificateManager<S> {
    store: S,
    cluster: String,
    namespace: String,
    validity_days: i64,
}

impl<S: SecretStore> CertificateManager<S> {
    pub fn new(store: S, cluster: &str, namespace: &str, validity_days: i64) -> Self {
        Self {
            store,
            cluster: cluster.to_string(),
            namespace: namespace.to_string(),
            validity_days,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load the cluster CA, generating and persisting it on first use.
    ///
    /// A stored CA that cannot be parsed, or whose key does not match its
    /// certificate, is reported as [`PkiError::CaCorruption`] and left as is.
    pub async fn ensure_ca(&self) -> Result<CertificateAuthority> {
        let secret = ca_secret_name(&self.cluster);
        match self.store.load(&secret).await? {
            Some(data) => {
                let corrupt = |message: String| PkiError::CaCorruption {
                    secret: secret.clone(),
                    message,
                };
                let cert = data
                    .get(CA_CERT_KEY)
                    .ok_or_else(|| corrupt(format!("missing {}", CA_CERT_KEY)))?;
                let key = data
                    .get(CA_KEY_KEY)
                    .ok_or_else(|| corrupt(format!("missing {}", CA_KEY_KEY)))?;
                CertificateAuthority::from_pem(cert, key).map_err(|e| corrupt(e.to_string()))
            }
            None => {
                info!(cluster = %self.cluster, secret = %secret, "Generating cluster certificate authority");
                let ca = CertificateAuthority::generate(&self.cluster)?;
                let data = [
                    (CA_CERT_KEY.to_string(), ca.cert_pem().to_string()),
                    (CA_KEY_KEY.to_string(), ca.key_pem().to_string()),
                ]
                .into_iter()
                .collect();
                self.store.save(&secret, data).await?;
                Ok(ca)
            }
        }
    }

    /// Return the stored bundle for `identity` if it is intact, signed by the
    /// current CA and unexpired; otherwise issue and persist a new version.
    pub async fn ensure(&self, identity: Identity) -> Result<CertificateBundle> {
        let ca = self.ensure_ca().await?;
        let secret = identity.secret_name(&self.cluster);
        let stored = self.store.load(&secret).await?;

        let mut last_version = 0;
        if let Some(data) = &stored {
            match CertificateBundle::from_data(identity, data) {
                Ok(bundle) if self.is_usable(&ca, &bundle) => {
                    let normalized = bundle.to_data();
                    if *data != normalized {
                        debug!(cluster = %self.cluster, %identity, version = bundle.version, "Rewriting stored bundle with versioned keys");
                        self.store.save(&secret, normalized).await?;
                    }
                    return Ok(bundle);
                }
                Ok(bundle) => {
                    warn!(cluster = %self.cluster, %identity, version = bundle.version, "Stored certificate is expired or not issued by the current CA, reissuing");
                    last_version = bundle.version;
                }
                Err(e) => {
                    warn!(cluster = %self.cluster, %identity, error = %e, "Stored certificate bundle is unreadable, reissuing");
                    last_version = data
                        .get(VERSION_KEY)
                        .and_then(|v| v.trim().parse().ok())
                        .unwrap_or(0);
                }
            }
        }

        self.issue(&ca, identity, last_version + 1, None).await
    }

    /// Force a new version for `identity`, keeping the current key and
    /// certificate in the previous slot until [`Self::release_previous`].
    pub async fn rotate(&self, identity: Identity) -> Result<CertificateBundle> {
        let ca = self.ensure_ca().await?;
        let secret = identity.secret_name(&self.cluster);
        let current = match self.store.load(&secret).await? {
            Some(data) => CertificateBundle::from_data(identity, &data).ok(),
            None => None,
        };

        let (version, previous) = match current {
            Some(current) => (
                current.version + 1,
                Some(PreviousBundle {
                    version: current.version,
                    cert_pem: current.cert_pem,
                    key_pem: current.key_pem,
                }),
            ),
            None => (1, None),
        };

        info!(cluster = %self.cluster, %identity, version, "Rotating certificate");
        self.issue(&ca, identity, version, previous).await
    }

    /// The superseded key and certificate, if not yet released
    pub async fn previous(&self, identity: Identity) -> Result<Option<PreviousBundle>> {
        let secret = identity.secret_name(&self.cluster);
        Ok(match self.store.load(&secret).await? {
            Some(data) => CertificateBundle::from_data(identity, &data)
                .ok()
                .and_then(|b| b.previous),
            None => None,
        })
    }

    /// Drop the previous slot. Returns whether anything was released.
    pub async fn release_previous(&self, identity: Identity) -> Result<bool> {
        let secret = identity.secret_name(&self.cluster);
        let Some(data) = self.store.load(&secret).await? else {
            return Ok(false);
        };
        let Ok(mut bundle) = CertificateBundle::from_data(identity, &data) else {
            return Ok(false);
        };
        let Some(previous) = bundle.previous.take() else {
            return Ok(false);
        };

        self.store.save(&secret, bundle.to_data()).await?;
        debug!(cluster = %self.cluster, %identity, version = previous.version, "Released previous certificate");
        Ok(true)
    }

    fn is_usable(&self, ca: &CertificateAuthority, bundle: &CertificateBundle) -> bool {
        bundle.ca_cert_pem == ca.cert_pem()
            && ca.verify(&bundle.cert_pem)
            && bundle.not_after > Utc::now()
    }

    async fn issue(
        &self,
        ca: &CertificateAuthority,
        identity: Identity,
        version: u32,
        previous: Option<PreviousBundle>,
    ) -> Result<CertificateBundle> {
        let (cert_pem, key_pem) =
            ca.issue(identity, &self.cluster, &self.namespace, self.validity_days)?;
        let bundle =
            CertificateBundle::new(identity, version, ca.cert_pem(), cert_pem, key_pem, previous)?;
        self.store
            .save(&identity.secret_name(&self.cluster), bundle.to_data())
            .await?;
        Ok(bundle)
    }
}
