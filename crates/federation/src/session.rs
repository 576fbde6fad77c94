//! Session state for one federated peer.
//!
//! A [`PeerLink`] is created by a real backend and shared with all of its
//! proxies. It owns the transport and the current session token. The
//! token may be replaced at any moment by a handshake on another task;
//! callers read a copy and rely on the retry wrapper when the copy turns
//! out to be stale.

use std::sync::Arc;

use hivelink_core::identity::InstanceIdentity;
use tokio::sync::RwLock;

use crate::config::FederationSettings;
use crate::error::FederationError;
use crate::messages::HandshakeInfo;
use crate::transport::PeerTransport;

/// Shared connection to a peer: transport plus session token.
pub struct PeerLink {
    settings: FederationSettings,
    transport: Arc<dyn PeerTransport>,
    identity: InstanceIdentity,
    session: RwLock<Option<String>>,
}

impl PeerLink {
    pub fn new(
        settings: FederationSettings,
        transport: Arc<dyn PeerTransport>,
        identity: InstanceIdentity,
    ) -> Self {
        Self {
            settings,
            transport,
            identity,
            session: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &FederationSettings {
        &self.settings
    }

    pub fn transport(&self) -> &dyn PeerTransport {
        self.transport.as_ref()
    }

    pub fn address(&self) -> &str {
        self.settings.base_url()
    }

    /// Current session token, if a handshake has succeeded.
    pub async fn session_id(&self) -> Option<String> {
        self.session.read().await.clone()
    }

    /// Open a new session and store its token.
    ///
    /// Fails with [`FederationError::SelfConnection`] if the peer is this
    /// very process; the stored token is left untouched in that case.
    pub async fn handshake(&self) -> Result<HandshakeInfo, FederationError> {
        let info = self.transport.new_session().await?;

        if let Some(server_id) = info.server_id.as_deref() {
            if self.identity.matches(server_id) {
                tracing::error!(
                    address = %self.address(),
                    "Peer is this instance itself; check the configured address",
                );
                return Err(FederationError::SelfConnection {
                    address: self.address().to_string(),
                });
            }
        }

        *self.session.write().await = Some(info.session_id.clone());
        tracing::debug!(
            address = %self.address(),
            count_running = info.count_running,
            "Opened peer session",
        );
        Ok(info)
    }

    /// Session token, performing a handshake first if there is none.
    pub async fn ensure_session(&self) -> Result<String, FederationError> {
        if let Some(session) = self.session_id().await {
            return Ok(session);
        }
        Ok(self.handshake().await?.session_id)
    }

    /// Forget the session token.
    pub async fn clear(&self) {
        *self.session.write().await = None;
    }
}
