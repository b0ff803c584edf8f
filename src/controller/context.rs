use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use kube::Client;

use crate::config::OperatorConfig;
use crate::controller::error::Error;
use crate::health::HealthState;

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Operator configuration
    pub config: Arc<OperatorConfig>,
    /// Health state for metrics (optional)
    pub health_state: Option<Arc<HealthState>>,
    /// Consecutive failed passes per cluster (`namespace/name`)
    errors: Arc<Mutex<HashMap<String, u32>>>,
}

impl Context {
    pub fn new(
        client: Client,
        config: OperatorConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            client,
            config: Arc::new(config),
            health_state,
            errors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a failed reconciliation and return the length of the streak
    pub fn record_error(&self, key: &str, error: &Error) -> u32 {
        let mut errors = self.errors();
        let streak = errors.entry(key.to_string()).or_default();
        *streak = streak.saturating_add(1);
        tracing::trace!(key, %error, streak = *streak, "Recorded reconcile failure");
        *streak
    }

    /// Consecutive failed passes recorded so far
    pub fn error_streak(&self, key: &str) -> u32 {
        self.errors().get(key).copied().unwrap_or_default()
    }

    /// Forget error history after a successful reconciliation
    pub fn reset_errors(&self, key: &str) {
        self.errors().remove(key);
    }

    fn errors(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        // a panic while holding the lock leaves plain counters behind
        self.errors.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
