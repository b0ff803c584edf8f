//! Operator configuration read from the environment
//!
//! | Variable                         | Default  |
//! |----------------------------------|----------|
//! | `WATCH_NAMESPACE`                | all      |
//! | `HEALTH_ADDR`                    | 0.0.0.0:8080 |
//! | `HEALTH_PROBE_TIMEOUT_SECS`      | 10       |
//! | `ROLLOUT_PROCEED_HEALTH`         | yellow   |
//! | `ROLLOUT_DATA_REMOVAL_HEALTH`    | green    |
//! | `ROLLOUT_HEALTH_POLL_SECS`       | 5        |
//! | `ROLLOUT_HEALTH_POLL_MAX_SECS`   | 60       |
//! | `ROLLOUT_MAX_WAIT_SECS`          | 1800     |
//! | `ROLLOUT_DEFERRAL_SECS`          | 15       |
//! | `TRANSIENT_RETRY_BUDGET`         | 5        |
//! | `CERT_ROTATION_HORIZON_DAYS`     | 30       |
//! | `CERT_VALIDITY_DAYS`             | 365      |
//!
//! Unparsable values fall back to the default with a warning.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::controller::BackoffConfig;
use crate::crd::ClusterHealth;

/// Thresholds and timings of the rollout sequencer
#[derive(Clone, Debug)]
pub struct RolloutPolicy {
    /// Health required to advance past AwaitingHealth
    pub proceed_health: ClusterHealth,
    /// Health required before removing a data node when replicas are configured
    pub data_removal_health: ClusterHealth,
    /// Poll schedule while awaiting health
    pub health_backoff: BackoffConfig,
    /// Wait after which a step is reported stalled
    pub max_wait: Duration,
    /// Requeue interval for deferred steps
    pub deferral_interval: Duration,
    /// Consecutive transient apply failures tolerated before raising a condition
    pub transient_retry_budget: u32,
}

impl Default for RolloutPolicy {
    fn default() -> Self {
        Self {
            proceed_health: ClusterHealth::Yellow,
            data_removal_health: ClusterHealth::Green,
            health_backoff: BackoffConfig {
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
                jitter: 0.0,
            },
            max_wait: Duration::from_secs(30 * 60),
            deferral_interval: Duration::from_secs(15),
            transient_retry_budget: 5,
        }
    }
}

impl RolloutPolicy {
    /// Health needed before a data node is removed; at most Yellow when the
    /// cluster keeps no replica shards.
    pub fn data_removal_threshold(&self, replica_shards: u32) -> ClusterHealth {
        if replica_shards == 0 {
            ClusterHealth::Yellow.min(self.data_removal_health)
        } else {
            self.data_removal_health
        }
    }
}

/// Process-wide operator configuration
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace to watch; all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Listen address of the probe and metrics server
    pub health_addr: SocketAddr,
    /// Timeout of every administrative API call
    pub probe_timeout: Duration,
    pub rollout: RolloutPolicy,
    /// Leaf certificates are rotated once they expire within this horizon
    pub cert_rotation_horizon: chrono::Duration,
    pub cert_validity_days: i64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            health_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            probe_timeout: Duration::from_secs(10),
            rollout: RolloutPolicy::default(),
            cert_rotation_horizon: chrono::Duration::days(30),
            cert_validity_days: 365,
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let rollout_defaults = defaults.rollout.clone();

        let watch_namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty());

        let health_addr = parse_or(&lookup, "HEALTH_ADDR", defaults.health_addr);

        let probe_timeout = Duration::from_secs(parse_or(
            &lookup,
            "HEALTH_PROBE_TIMEOUT_SECS",
            defaults.probe_timeout.as_secs(),
        ));

        let rollout = RolloutPolicy {
            proceed_health: health_or(
                &lookup,
                "ROLLOUT_PROCEED_HEALTH",
                rollout_defaults.proceed_health,
            ),
            data_removal_health: health_or(
                &lookup,
                "ROLLOUT_DATA_REMOVAL_HEALTH",
                rollout_defaults.data_removal_health,
            ),
            health_backoff: BackoffConfig {
                initial_delay: Duration::from_secs(parse_or(
                    &lookup,
                    "ROLLOUT_HEALTH_POLL_SECS",
                    rollout_defaults.health_backoff.initial_delay.as_secs(),
                )),
                max_delay: Duration::from_secs(parse_or(
                    &lookup,
                    "ROLLOUT_HEALTH_POLL_MAX_SECS",
                    rollout_defaults.health_backoff.max_delay.as_secs(),
                )),
                ..rollout_defaults.health_backoff
            },
            max_wait: Duration::from_secs(parse_or(
                &lookup,
                "ROLLOUT_MAX_WAIT_SECS",
                rollout_defaults.max_wait.as_secs(),
            )),
            deferral_interval: Duration::from_secs(parse_or(
                &lookup,
                "ROLLOUT_DEFERRAL_SECS",
                rollout_defaults.deferral_interval.as_secs(),
            )),
            transient_retry_budget: parse_or(
                &lookup,
                "TRANSIENT_RETRY_BUDGET",
                rollout_defaults.transient_retry_budget,
            ),
        };

        let cert_rotation_horizon = chrono::Duration::days(parse_or(
            &lookup,
            "CERT_ROTATION_HORIZON_DAYS",
            defaults.cert_rotation_horizon.num_days(),
        ));
        let mut cert_validity_days =
            parse_or(&lookup, "CERT_VALIDITY_DAYS", defaults.cert_validity_days);
        if cert_validity_days <= cert_rotation_horizon.num_days() {
            warn!(
                cert_validity_days,
                horizon_days = cert_rotation_horizon.num_days(),
                "CERT_VALIDITY_DAYS must exceed the rotation horizon, using default"
            );
            cert_validity_days = defaults.cert_validity_days.max(cert_rotation_horizon.num_days() + 1);
        }

        Self {
            watch_namespace,
            health_addr,
            probe_timeout,
            rollout,
            cert_rotation_horizon,
            cert_validity_days,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = %default, "Invalid configuration value, using default");
            default
        }),
        None => default,
    }
}

fn health_or<F>(lookup: &F, key: &str, default: ClusterHealth) -> ClusterHealth
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if v == "green" => ClusterHealth::Green,
        Some(v) if v == "yellow" => ClusterHealth::Yellow,
        Some(v) => {
            warn!(key, value = %v, default = %default, "Health threshold must be green or yellow, using default");
            default
        }
        None => default,
    }
}
