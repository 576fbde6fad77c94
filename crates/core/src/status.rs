//! Backend lifecycle status.
//!
//! A federated backend moves `Disabled -> Loading -> {Running | Idle | Errored}`.
//! `Running <-> Idle` is the only steady-state cycle; leaving `Errored` or
//! `Disabled` requires a full restart of the backend.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Externally visible state of a backend record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    /// No address configured, or the backend was shut down.
    Disabled,
    /// Startup in progress.
    Loading,
    /// Accepting work.
    Running,
    /// Temporarily unavailable; recovers on its own once the peer answers.
    Idle,
    /// Failed to start. Unusable until restarted.
    Errored,
}

impl BackendStatus {
    /// Lowercase name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Loading => "loading",
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Errored => "errored",
        }
    }

    /// Whether a backend in this state may be handed generation work.
    pub fn is_usable(self) -> bool {
        self == Self::Running
    }

    /// Whether the state can only be left by restarting the backend.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disabled | Self::Errored)
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_is_usable() {
        assert!(BackendStatus::Running.is_usable());
        assert!(!BackendStatus::Idle.is_usable());
        assert!(!BackendStatus::Loading.is_usable());
        assert!(!BackendStatus::Errored.is_usable());
        assert!(!BackendStatus::Disabled.is_usable());
    }

    #[test]
    fn idle_is_not_terminal() {
        assert!(!BackendStatus::Idle.is_terminal());
        assert!(BackendStatus::Errored.is_terminal());
        assert!(BackendStatus::Disabled.is_terminal());
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&BackendStatus::Idle).unwrap();
        assert_eq!(json, "\"idle\"");
        assert_eq!(BackendStatus::Errored.to_string(), "errored");
    }
}
