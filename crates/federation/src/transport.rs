//! Seam between the federation logic and the wire.
//!
//! [`PeerApi`](crate::api::PeerApi) is the production implementation.
//! Tests drive the federation layer through scripted implementations.

use async_trait::async_trait;
use hivelink_core::types::RemoteBackendId;
use serde_json::Value;

use crate::error::FederationError;
use crate::image::GeneratedImage;
use crate::messages::{HandshakeInfo, SubBackendDescriptor};

/// Remote peer protocol surface used by federation.
///
/// Every method except [`new_session`](Self::new_session) reports an
/// expired session as [`FederationError::SessionInvalid`].
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Address of the peer, for logging.
    fn address(&self) -> &str;

    /// Open a fresh session.
    async fn new_session(&self) -> Result<HandshakeInfo, FederationError>;

    /// List the peer's non-proxy sub-workers.
    async fn list_backends(
        &self,
        session_id: &str,
    ) -> Result<Vec<SubBackendDescriptor>, FederationError>;

    /// Ask the peer to load `model` on one sub-worker. `Ok(false)` means
    /// the peer refused.
    async fn select_model(
        &self,
        session_id: &str,
        model: &str,
        backend_id: RemoteBackendId,
    ) -> Result<bool, FederationError>;

    /// Run one generation and wait for the result.
    async fn generate(&self, request: &Value) -> Result<Vec<GeneratedImage>, FederationError>;

    /// Start a generation over a live channel.
    async fn open_live(&self, request: &Value) -> Result<Box<dyn LiveChannel>, FederationError>;
}

/// An open live generation stream.
#[async_trait]
pub trait LiveChannel: Send {
    /// Next JSON message, or `None` once the peer has closed the channel.
    async fn recv(&mut self) -> Option<Result<Value, FederationError>>;

    /// Close the channel. Safe to call after the peer already closed it.
    async fn close(&mut self) -> Result<(), FederationError>;
}
