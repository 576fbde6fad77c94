//! In-memory images returned by a remote peer.
//!
//! Peers return images as base64 strings, usually as data URLs of the
//! form `data:image/png;base64,<payload>`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::FederationError;

const BASE64_DELIMITER: &str = ";base64,";

/// A decoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    /// Raw encoded image bytes (PNG, JPEG, ...).
    pub data: Vec<u8>,
    /// Mime type from the data URL prefix, if one was present.
    pub mime_type: Option<String>,
}

impl GeneratedImage {
    /// Decode an image string as sent by a peer.
    ///
    /// Everything after the `;base64,` delimiter is decoded; a string
    /// without the delimiter is decoded whole.
    pub fn from_encoded(encoded: &str) -> Result<Self, FederationError> {
        let (mime_type, payload) = match encoded.split_once(BASE64_DELIMITER) {
            Some((prefix, payload)) => (
                prefix
                    .strip_prefix("data:")
                    .filter(|m| !m.is_empty())
                    .map(str::to_string),
                payload,
            ),
            None => (None, encoded),
        };

        let data = STANDARD
            .decode(payload.trim())
            .map_err(|e| FederationError::RemoteProtocol(format!("Invalid image payload: {e}")))?;

        Ok(Self { data, mime_type })
    }
}
