//! Error taxonomy for the federation layer.

use tokio_tungstenite::tungstenite::Error as WsError;

use crate::registry::RegistryError;

/// Errors produced while talking to a remote peer or managing proxies.
///
/// [`SessionInvalid`](Self::SessionInvalid) is absorbed by the session
/// retry wrapper and never reaches callers of the public backend API.
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    /// The peer could not be reached (network, DNS, TLS, timeout).
    #[error("Connection error: {0}")]
    Connection(String),

    /// The peer reported that our session id is no longer valid.
    #[error("Remote session is invalid")]
    SessionInvalid,

    /// The peer identified itself as this very process.
    #[error("Refusing to federate with this instance itself at {address}")]
    SelfConnection {
        /// Configured peer address.
        address: String,
    },

    /// The peer answered with something we could not interpret.
    #[error("Protocol error: {0}")]
    RemoteProtocol(String),

    /// The peer understood the request and reported a failure.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The session kept being reported invalid after every rebuild.
    #[error("Remote session still invalid after {attempts} rebuilds")]
    SessionRetriesExhausted {
        /// Number of rebuilds performed before giving up.
        attempts: u32,
    },

    /// Proxy creation or deletion was refused by the registry.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The backend or the process is shutting down.
    #[error("Shutdown in progress")]
    ShutdownInProgress,
}

impl FederationError {
    /// Whether this error must abort startup even when idling is allowed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SelfConnection { .. })
    }
}

impl From<reqwest::Error> for FederationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() || e.is_body() {
            Self::RemoteProtocol(e.to_string())
        } else {
            Self::Connection(e.to_string())
        }
    }
}

impl From<WsError> for FederationError {
    fn from(e: WsError) -> Self {
        match e {
            WsError::Io(_) | WsError::ConnectionClosed | WsError::AlreadyClosed => {
                Self::Connection(e.to_string())
            }
            other => Self::RemoteProtocol(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for FederationError {
    fn from(e: serde_json::Error) -> Self {
        Self::RemoteProtocol(format!("Malformed JSON: {e}"))
    }
}
