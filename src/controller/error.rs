//! Error types for the Elasticsearch controller

use std::time::Duration;

use thiserror::Error;

use crate::elasticsearch::ClientError;
use crate::pki::PkiError;
use crate::topology::PlanError;

/// Error variants are named with the `Error` suffix where they wrap another
/// layer's error (e.g., `KubeError`, `AdminApiError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    #[error("Transient error (will retry): {0}")]
    TransientError(String),

    #[error("Persistence failure (will retry): {0}")]
    PersistenceFailure(String),

    #[error("Certificate authority corrupt: {0}")]
    CaCorruption(String),

    #[error("PKI error: {0}")]
    PkiError(String),

    #[error("Admin API error: {0}")]
    AdminApiError(#[from] ClientError),

    #[error("Finalizer error: {0}")]
    FinalizerError(String),
}

impl From<PlanError> for Error {
    fn from(e: PlanError) -> Self {
        Error::InvalidSpec(e.to_string())
    }
}

impl From<PkiError> for Error {
    fn from(e: PkiError) -> Self {
        match e {
            PkiError::Persistence { .. } => Error::PersistenceFailure(e.to_string()),
            PkiError::StoreUnavailable { .. } => Error::TransientError(e.to_string()),
            PkiError::CaCorruption { .. } => Error::CaCorruption(e.to_string()),
            other => Error::PkiError(other.to_string()),
        }
    }
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            Error::TransientError(_) => true,
            Error::PersistenceFailure(_) => true,
            Error::AdminApiError(e) => e.is_transient(),
            Error::PkiError(_) => true,
            Error::FinalizerError(_) => true,
            Error::InvalidSpec(_) => false,
            Error::CaCorruption(_) => false,
            Error::SerializationError(_) => false,
            Error::MissingObjectKey(_) => false,
        }
    }

    /// Errors that stop reconciliation until a human intervenes.
    /// These are written to the resource status.
    pub fn is_halting(&self) -> bool {
        matches!(self, Error::InvalidSpec(_) | Error::CaCorruption(_))
    }

    /// Kubernetes 404 for the reconciled object or one of its children
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(e)) if e.code == 404)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff: `initial_delay * multiplier^attempt`, capped at
/// `max_delay`, spread by up to `jitter` of itself in either direction
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay, 0.0 disables jitter
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(32) as i32;
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let spread = base * self.jitter;
        let offset = if spread > 0.0 {
            (rand::random::<f64>() * 2.0 - 1.0) * spread
        } else {
            0.0
        };
        Duration::from_secs_f64((base + offset).clamp(0.0, self.max_delay.as_secs_f64()))
    }

    /// Errors that cannot clear on their own wait the full `max_delay`
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            self.max_delay
        }
    }
}
