use std::time::Duration;

use hivelink_federation::{FederationConfig, FederationSettings};

/// Errors raised while reading node configuration.
#[derive(Debug, thiserror::Error)]
pub enum NodeConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Node configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Bind address for the status routes (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `7802`).
    pub port: u16,
    /// Peer addresses, parsed from comma-separated `FEDERATION_PEERS`.
    pub peers: Vec<String>,
    /// Whether unreachable peers idle instead of erroring.
    pub allow_idle: bool,
    /// Health monitor period in seconds (default: `1`).
    pub idle_check_interval_secs: u64,
    /// Peer request timeout in seconds (default: `120`).
    pub request_timeout_secs: u64,
    /// Max session rebuilds per call (default: `5`).
    pub session_retry_limit: u32,
    /// How long shutdown waits for background work (default: `5`).
    pub shutdown_timeout_secs: u64,
}

impl NodeConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default   |
    /// |----------------------------|-----------|
    /// | `HOST`                     | `0.0.0.0` |
    /// | `PORT`                     | `7802`    |
    /// | `FEDERATION_PEERS`         | (empty)   |
    /// | `FEDERATION_ALLOW_IDLE`    | `false`   |
    /// | `IDLE_CHECK_INTERVAL_SECS` | `1`       |
    /// | `REQUEST_TIMEOUT_SECS`     | `120`     |
    /// | `SESSION_RETRY_LIMIT`      | `5`       |
    /// | `SHUTDOWN_TIMEOUT_SECS`    | `5`       |
    pub fn from_env() -> Result<Self, NodeConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, NodeConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let host = var("HOST", "0.0.0.0");
        let port = parse("PORT", var("PORT", "7802"), "a valid port")?;

        let peers = var("FEDERATION_PEERS", "")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let allow_idle = parse_bool("FEDERATION_ALLOW_IDLE", var("FEDERATION_ALLOW_IDLE", "false"))?;
        let idle_check_interval_secs = parse(
            "IDLE_CHECK_INTERVAL_SECS",
            var("IDLE_CHECK_INTERVAL_SECS", "1"),
            "a whole number of seconds",
        )?;
        let request_timeout_secs = parse(
            "REQUEST_TIMEOUT_SECS",
            var("REQUEST_TIMEOUT_SECS", "120"),
            "a whole number of seconds",
        )?;
        let session_retry_limit = parse(
            "SESSION_RETRY_LIMIT",
            var("SESSION_RETRY_LIMIT", "5"),
            "a non-negative integer",
        )?;
        let shutdown_timeout_secs = parse(
            "SHUTDOWN_TIMEOUT_SECS",
            var("SHUTDOWN_TIMEOUT_SECS", "5"),
            "a whole number of seconds",
        )?;

        Ok(Self {
            host,
            port,
            peers,
            allow_idle,
            idle_check_interval_secs,
            request_timeout_secs,
            session_retry_limit,
            shutdown_timeout_secs,
        })
    }

    /// Timing shared by every federated backend on this node.
    pub fn federation_config(&self) -> FederationConfig {
        let mut config = FederationConfig {
            idle_check_interval: Duration::from_secs(self.idle_check_interval_secs.max(1)),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_timeout_secs),
            ..FederationConfig::default()
        };
        config.retry.max_session_rebuilds = self.session_retry_limit;
        config
    }

    /// One settings entry per configured peer.
    pub fn peer_settings(&self) -> Vec<FederationSettings> {
        self.peers
            .iter()
            .map(|address| FederationSettings::new(address.as_str()).with_allow_idle(self.allow_idle))
            .collect()
    }
}

fn parse<T: std::str::FromStr>(
    var: &'static str,
    value: String,
    expected: &'static str,
) -> Result<T, NodeConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| NodeConfigError::Invalid {
            var,
            expected,
            value,
        })
}

fn parse_bool(var: &'static str, value: String) -> Result<bool, NodeConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(NodeConfigError::Invalid {
            var,
            expected: "a boolean",
            value,
        }),
    }
}
