//! Wire types and parsers for the peer API.
//!
//! Every peer reply is a JSON object. Failures are reported in-band:
//! `{"error_id": "invalid_session_id"}` when the session expired, or
//! `{"error": "<message>"}` for anything else. The parsers in this module
//! turn both into [`FederationError`]s so that callers only see typed
//! results.

use std::collections::BTreeSet;

use hivelink_core::types::RemoteBackendId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FederationError;
use crate::image::GeneratedImage;

/// `error_id` value a peer sends when the session id is unknown or expired.
pub const INVALID_SESSION_ID: &str = "invalid_session_id";

/// Reply to `GetNewSession`.
#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeInfo {
    /// Session token to attach to every later request.
    pub session_id: String,
    /// Identity of the remote process, used to detect self-federation.
    #[serde(default)]
    pub server_id: Option<String>,
    /// Number of running workers the peer had at handshake time.
    #[serde(default)]
    pub count_running: u32,
}

/// Status of a remote sub-worker as far as federation cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Running,
    Loading,
    /// Any other remote state (errored, disabled, idle, ...).
    #[serde(other)]
    Other,
}

/// One remote sub-worker, as reported by `ListBackends`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubBackendDescriptor {
    pub id: RemoteBackendId,
    pub status: RemoteStatus,
    #[serde(rename = "type", default)]
    pub backend_type: String,
    #[serde(default)]
    pub features: BTreeSet<String>,
    #[serde(rename = "max_usages", default)]
    pub max_usage_count: u32,
}

/// Opaque generation parameters.
///
/// The payload schema belongs to the peer; federation only forces the
/// routing fields when shaping the wire request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationParams(Map<String, Value>);

impl GenerationParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Wrap an arbitrary JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self, FederationError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(FederationError::RemoteProtocol(format!(
                "Generation parameters must be a JSON object, got {other}"
            ))),
        }
    }

    /// Shape the wire request: one image, never persisted by the peer,
    /// addressed to `exact_backend` when routing through a proxy.
    pub fn to_wire_request(
        &self,
        session_id: &str,
        exact_backend: Option<RemoteBackendId>,
    ) -> Value {
        let mut request = self.0.clone();
        request.insert("images".into(), Value::from(1));
        request.insert("session_id".into(), Value::from(session_id));
        request.insert("donotsave".into(), Value::Bool(true));
        match exact_backend {
            Some(id) => {
                request.insert("exactbackendid".into(), Value::from(id));
            }
            None => {
                request.remove("exactbackendid");
            }
        }
        Value::Object(request)
    }
}

/// A classified message from a live generation stream.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    /// A `gen_progress` object (step counters, optional preview).
    Progress(Map<String, Value>),
    /// The final image.
    Image(GeneratedImage),
    /// The peer reported a generation failure.
    Failed(String),
    /// Anything else; logged and ignored.
    Other(Value),
}

/// Fail with [`FederationError::SessionInvalid`] if the reply says so.
pub fn check_session(reply: &Value) -> Result<(), FederationError> {
    if reply.get("error_id").and_then(Value::as_str) == Some(INVALID_SESSION_ID) {
        return Err(FederationError::SessionInvalid);
    }
    Ok(())
}

/// Like [`check_session`], and also surface an in-band `error` message.
pub fn check_reply(reply: &Value) -> Result<(), FederationError> {
    check_session(reply)?;
    if let Some(message) = reply.get("error").and_then(Value::as_str) {
        return Err(FederationError::Remote(message.to_string()));
    }
    Ok(())
}

/// Parse a `GetNewSession` reply.
pub fn parse_handshake(reply: Value) -> Result<HandshakeInfo, FederationError> {
    check_reply(&reply)?;
    Ok(serde_json::from_value(reply)?)
}

/// Parse a `ListBackends` reply: an object keyed by remote id.
///
/// Descriptors are returned sorted by id.
pub fn parse_backend_list(reply: Value) -> Result<Vec<SubBackendDescriptor>, FederationError> {
    check_reply(&reply)?;
    let Value::Object(entries) = reply else {
        return Err(FederationError::RemoteProtocol(
            "Backend list is not a JSON object".into(),
        ));
    };

    let mut descriptors = entries
        .into_iter()
        .map(|(key, entry)| {
            serde_json::from_value::<SubBackendDescriptor>(entry).map_err(|e| {
                FederationError::RemoteProtocol(format!("Malformed backend entry {key}: {e}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    descriptors.sort_by_key(|d| d.id);
    Ok(descriptors)
}

/// Parse a `SelectModel` reply. Anything but `success: true` is a refusal.
pub fn parse_select_model(reply: &Value) -> Result<bool, FederationError> {
    check_session(reply)?;
    Ok(reply.get("success").and_then(Value::as_bool).unwrap_or(false))
}

/// Parse a `GenerateText2Image` reply into decoded images.
pub fn parse_generate_reply(reply: &Value) -> Result<Vec<GeneratedImage>, FederationError> {
    check_reply(reply)?;
    let images = reply
        .get("images")
        .and_then(Value::as_array)
        .ok_or_else(|| FederationError::RemoteProtocol("Reply carries no images".into()))?;

    images
        .iter()
        .map(|image| match image {
            Value::String(encoded) => GeneratedImage::from_encoded(encoded),
            // Newer peers send `{"image": "...", "metadata": ...}` entries.
            Value::Object(obj) => match obj.get("image").and_then(Value::as_str) {
                Some(encoded) => GeneratedImage::from_encoded(encoded),
                None => Err(FederationError::RemoteProtocol(
                    "Image entry has no image field".into(),
                )),
            },
            other => Err(FederationError::RemoteProtocol(format!(
                "Unexpected image entry: {other}"
            ))),
        })
        .collect()
}

/// Classify one live-stream message.
pub fn classify_stream_message(message: Value) -> Result<StreamMessage, FederationError> {
    check_session(&message)?;
    let Value::Object(mut obj) = message else {
        return Ok(StreamMessage::Other(message));
    };

    if let Some(Value::Object(_)) = obj.get("gen_progress") {
        if let Some(Value::Object(progress)) = obj.remove("gen_progress") {
            return Ok(StreamMessage::Progress(progress));
        }
    }
    if let Some(image) = obj.get("image") {
        let encoded = image.as_str().ok_or_else(|| {
            FederationError::RemoteProtocol("Live image field is not a string".into())
        })?;
        return Ok(StreamMessage::Image(GeneratedImage::from_encoded(encoded)?));
    }
    if let Some(message) = obj.get("error").and_then(Value::as_str) {
        return Ok(StreamMessage::Failed(message.to_string()));
    }
    Ok(StreamMessage::Other(Value::Object(obj)))
}
