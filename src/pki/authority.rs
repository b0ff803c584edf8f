use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType, string::Ia5String,
};
use x509_parser::prelude::*;

use super::{CertificateInfo, Identity, PkiError, Result, parse_pem};

/// Validity period of a cluster CA (5 years)
pub const CA_VALIDITY_DAYS: i64 = 5 * 365;

const ORGANIZATION: &str = "Logging";

fn validity(days: i64) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    // tolerate clock skew between nodes
    let not_before = now - ::time::Duration::minutes(5);
    (not_before, now + ::time::Duration::days(days))
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn
}

fn san(name: &str) -> Result<SanType> {
    if let Ok(ip) = name.parse::<std::net::IpAddr>() {
        return Ok(SanType::IpAddress(ip));
    }
    Ia5String::try_from(name.to_string())
        .map(SanType::DnsName)
        .map_err(|e| {
            PkiError::CertificateGeneration(format!("invalid DNS name '{}': {}", name, e))
        })
}

/// A cluster's certificate authority
#[derive(Clone)]
pub struct CertificateAuthority {
    cert_pem: String,
    key_pem: String,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("cert_pem", &self.cert_pem)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Create a new self-signed CA for `cluster`
    pub fn generate(cluster: &str) -> Result<Self> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(&format!("{} signing CA", cluster));
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let (not_before, not_after) = validity(CA_VALIDITY_DAYS);
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate()
            .map_err(|e| PkiError::KeyGeneration(format!("failed to generate CA key: {}", e)))?;
        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGeneration(format!("failed to create CA cert: {}", e))
        })?;

        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    /// Load a stored CA, checking that the key belongs to the certificate
    /// and that the certificate is self-signed.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let key_pair = KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::Parse(format!("failed to parse CA key: {}", e)))?;

        let der = parse_pem(cert_pem)?;
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| PkiError::Parse(format!("failed to parse CA cert: {}", e)))?;

        if !cert.is_ca() {
            return Err(PkiError::Parse("stored certificate is not a CA".to_string()));
        }
        if cert.public_key().subject_public_key.data.as_ref() != key_pair.public_key_raw() {
            return Err(PkiError::Parse(
                "CA key does not match CA certificate".to_string(),
            ));
        }
        cert.verify_signature(None)
            .map_err(|e| PkiError::Parse(format!("CA self-signature invalid: {}", e)))?;

        Ok(Self {
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    pub fn info(&self) -> Result<CertificateInfo> {
        CertificateInfo::from_pem(&self.cert_pem)
    }

    /// Issue a leaf certificate for `identity`, returning (cert PEM, key PEM)
    pub fn issue(
        &self,
        identity: Identity,
        cluster: &str,
        namespace: &str,
        validity_days: i64,
    ) -> Result<(String, String)> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(&identity.common_name(cluster));
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = if identity.serves_tls() {
            vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ]
        } else {
            vec![ExtendedKeyUsagePurpose::ClientAuth]
        };
        let (not_before, not_after) = validity(validity_days);
        params.not_before = not_before;
        params.not_after = not_after;
        params.subject_alt_names = identity
            .subject_alt_names(cluster, namespace)
            .iter()
            .map(|name| san(name))
            .collect::<Result<Vec<_>>>()?;

        let leaf_key = KeyPair::generate().map_err(|e| {
            PkiError::KeyGeneration(format!("failed to generate {} key: {}", identity, e))
        })?;

        let ca_key = KeyPair::from_pem(&self.key_pem)
            .map_err(|e| PkiError::Parse(format!("failed to load CA key: {}", e)))?;
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &ca_key)
            .map_err(|e| PkiError::Parse(format!("failed to create issuer: {}", e)))?;

        let cert = params.signed_by(&leaf_key, &issuer).map_err(|e| {
            PkiError::CertificateGeneration(format!("failed to sign {} cert: {}", identity, e))
        })?;

        Ok((cert.pem(), leaf_key.serialize_pem()))
    }

    /// Whether `cert_pem` was signed by this CA
    pub fn verify(&self, cert_pem: &str) -> bool {
        let (Ok(leaf_der), Ok(ca_der)) = (parse_pem(cert_pem), parse_pem(&self.cert_pem)) else {
            return false;
        };
        let (Ok((_, leaf)), Ok((_, ca))) = (
            X509Certificate::from_der(&leaf_der),
            X509Certificate::from_der(&ca_der),
        ) else {
            return false;
        };
        leaf.verify_signature(Some(ca.public_key())).is_ok()
    }
}
