//! Per-peer settings and layer-wide timing configuration.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// User-supplied settings for one federated peer.
#[derive(Debug, Clone, Default)]
pub struct FederationSettings {
    /// Network address of the other instance, e.g. `http://host:7801`.
    pub address: String,
    /// Whether an unreachable peer puts the backend into `Idle` instead
    /// of `Errored`. An idle backend returns to `Running` once the peer
    /// answers again.
    pub allow_idle: bool,
}

impl FederationSettings {
    /// Settings for `address` with idling disallowed.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            allow_idle: false,
        }
    }

    /// Builder-style setter for [`allow_idle`](Self::allow_idle).
    pub fn with_allow_idle(mut self, allow_idle: bool) -> Self {
        self.allow_idle = allow_idle;
        self
    }

    /// A blank address means the backend stays disabled.
    pub fn is_configured(&self) -> bool {
        !self.address.trim().is_empty()
    }

    /// Address without surrounding whitespace or a trailing slash.
    pub fn base_url(&self) -> &str {
        self.address.trim().trim_end_matches('/')
    }
}

/// Timing and retry parameters shared by every federated backend.
#[derive(Debug, Clone)]
pub struct FederationConfig {
    /// Delay between reconciliation passes while remote workers load.
    pub startup_poll_interval: Duration,
    /// Period of the idle health monitor.
    pub idle_check_interval: Duration,
    /// Timeout applied to every HTTP request to a peer.
    pub request_timeout: Duration,
    /// How long shutdown waits for a background task to finish.
    pub shutdown_grace: Duration,
    /// Session rebuild policy.
    pub retry: RetryPolicy,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            startup_poll_interval: Duration::from_secs(1),
            idle_check_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(120),
            shutdown_grace: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}
