//! WebSocket live generation channel.
//!
//! The request is sent as the first text frame. The peer then streams
//! JSON messages (progress, final image) and closes the socket when the
//! generation is done.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

use crate::error::FederationError;
use crate::transport::LiveChannel;

/// Largest single message accepted from a peer (final images are large).
const MAX_MESSAGE_BYTES: usize = 100 * 1024 * 1024;

/// A live channel to a peer over WebSocket.
pub struct WsLiveChannel {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    finished: bool,
}

impl WsLiveChannel {
    /// Connect to `url` and send `request` as the opening frame.
    pub async fn open(
        url: &str,
        request: &Value,
        send_timeout: Duration,
    ) -> Result<Self, FederationError> {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(MAX_MESSAGE_BYTES);
        config.max_frame_size = Some(MAX_MESSAGE_BYTES);

        let (mut stream, _response) = connect_async_with_config(url, Some(config), false)
            .await
            .map_err(|e| {
                FederationError::Connection(format!("Failed to open live channel at {url}: {e}"))
            })?;

        let text = serde_json::to_string(request)?;
        tokio::time::timeout(send_timeout, stream.send(Message::Text(text)))
            .await
            .map_err(|_| {
                FederationError::Connection("Timed out sending live generation request".into())
            })??;

        tracing::debug!(url = %url, "Opened live generation channel");
        Ok(Self {
            stream,
            finished: false,
        })
    }
}

#[async_trait]
impl LiveChannel for WsLiveChannel {
    async fn recv(&mut self) -> Option<Result<Value, FederationError>> {
        if self.finished {
            return None;
        }

        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str(&text).map_err(Into::into));
                }
                Ok(Message::Binary(bytes)) => {
                    return Some(serde_json::from_slice(&bytes).map_err(Into::into));
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {
                    // Handled automatically by tungstenite.
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "Live channel closed by peer");
                    break;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
            }
        }

        self.finished = true;
        None
    }

    async fn close(&mut self) -> Result<(), FederationError> {
        self.finished = true;
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
