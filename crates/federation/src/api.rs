//! HTTP client for the peer API.
//!
//! Wraps the peer's JSON endpoints (`/API/GetNewSession`,
//! `/API/ListBackends`, `/API/SelectModel`, `/API/GenerateText2Image`)
//! using [`reqwest`], and opens live generation channels over WebSocket
//! via [`WsLiveChannel`].

use std::time::Duration;

use async_trait::async_trait;
use hivelink_core::types::RemoteBackendId;
use serde_json::{json, Value};

use crate::error::FederationError;
use crate::image::GeneratedImage;
use crate::live::WsLiveChannel;
use crate::messages::{
    check_session, parse_backend_list, parse_generate_reply, parse_handshake,
    parse_select_model, HandshakeInfo, SubBackendDescriptor,
};
use crate::transport::{LiveChannel, PeerTransport};

const LIVE_ENDPOINT: &str = "API/GenerateText2ImageWS";

/// HTTP/WebSocket transport for a single peer.
pub struct PeerApi {
    client: reqwest::Client,
    address: String,
    request_timeout: Duration,
}

impl PeerApi {
    /// Create a client for the peer at `address`, e.g. `http://host:7801`.
    pub fn new(address: &str, request_timeout: Duration) -> Result<Self, FederationError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FederationError::Connection(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, address, request_timeout))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, address: &str, request_timeout: Duration) -> Self {
        Self {
            client,
            address: address.trim().trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    /// WebSocket URL of the live generation endpoint.
    pub fn live_url(&self) -> String {
        let base = if let Some(rest) = self.address.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.address.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.address.clone()
        };
        format!("{base}/{LIVE_ENDPOINT}")
    }

    // ---- private helpers ----

    /// POST a JSON body to `/API/{endpoint}` and return the JSON reply.
    async fn post_json(&self, endpoint: &str, body: &Value) -> Result<Value, FederationError> {
        let response = self
            .client
            .post(format!("{}/API/{endpoint}", self.address))
            .json(body)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.json::<Value>().await?)
    }

    /// Map a non-2xx status into an error. A JSON body that reports an
    /// invalid session still maps to [`FederationError::SessionInvalid`].
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, FederationError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        if let Ok(reply) = serde_json::from_str::<Value>(&body) {
            check_session(&reply)?;
        }
        Err(FederationError::RemoteProtocol(format!(
            "Peer returned {}: {body}",
            status.as_u16()
        )))
    }
}

#[async_trait]
impl PeerTransport for PeerApi {
    fn address(&self) -> &str {
        &self.address
    }

    async fn new_session(&self) -> Result<HandshakeInfo, FederationError> {
        let reply = self.post_json("GetNewSession", &json!({})).await?;
        parse_handshake(reply)
    }

    async fn list_backends(
        &self,
        session_id: &str,
    ) -> Result<Vec<SubBackendDescriptor>, FederationError> {
        let body = json!({ "session_id": session_id, "nonreal": true });
        let reply = self.post_json("ListBackends", &body).await?;
        parse_backend_list(reply)
    }

    async fn select_model(
        &self,
        session_id: &str,
        model: &str,
        backend_id: RemoteBackendId,
    ) -> Result<bool, FederationError> {
        let body = json!({
            "session_id": session_id,
            "model": model,
            "backendId": backend_id,
        });
        let reply = self.post_json("SelectModel", &body).await?;
        parse_select_model(&reply)
    }

    async fn generate(&self, request: &Value) -> Result<Vec<GeneratedImage>, FederationError> {
        let reply = self.post_json("GenerateText2Image", request).await?;
        parse_generate_reply(&reply)
    }

    async fn open_live(&self, request: &Value) -> Result<Box<dyn LiveChannel>, FederationError> {
        let channel = WsLiveChannel::open(&self.live_url(), request, self.request_timeout).await?;
        Ok(Box::new(channel))
    }
}
