//! Request dispatch to a peer.
//!
//! Every call runs under the session retry wrapper, so an expired session
//! is rebuilt and the call replayed without the caller noticing. Proxies
//! address their one remote worker through `exactbackendid`.

use serde_json::Value;

use crate::backend::FederatedBackend;
use crate::error::FederationError;
use crate::events::LiveEvent;
use crate::image::GeneratedImage;
use crate::messages::{classify_stream_message, GenerationParams, StreamMessage};
use crate::transport::LiveChannel;

impl FederatedBackend {
    /// Ask the peer to load `model` on this proxy's worker.
    ///
    /// Always `Ok(false)` on a real backend, which has no single worker to
    /// load onto. On success the model name is cached.
    pub async fn load_model(&self, model: &str) -> Result<bool, FederationError> {
        let Some(remote_id) = self.linked_remote_id() else {
            tracing::debug!(backend_id = self.id, "Real backend cannot load models");
            return Ok(false);
        };

        let loaded = self
            .run_with_session(|session| async move {
                self.link
                    .transport()
                    .select_model(&session, model, remote_id)
                    .await
            })
            .await?;

        if loaded {
            *self.current_model.write().await = Some(model.to_string());
            tracing::info!(backend_id = self.id, remote_id, model, "Model loaded on peer");
        } else {
            tracing::warn!(backend_id = self.id, remote_id, model, "Peer refused to load model");
        }
        Ok(loaded)
    }

    /// Run one generation and return the images the peer produced.
    pub async fn generate(
        &self,
        params: &GenerationParams,
    ) -> Result<Vec<GeneratedImage>, FederationError> {
        let exact = self.linked_remote_id();
        let images = self
            .run_with_session(|session| async move {
                let request = params.to_wire_request(&session, exact);
                self.link.transport().generate(&request).await
            })
            .await?;

        tracing::debug!(backend_id = self.id, count = images.len(), "Generation finished");
        Ok(images)
    }

    /// Run one generation over a live channel, relaying progress and the
    /// final image to `on_event`.
    ///
    /// Progress objects get a `batch_index` field set to `batch_id`. If
    /// the session has to be rebuilt mid-stream the generation restarts,
    /// so `on_event` may see progress start over. Shutdown of the backend
    /// ends the stream with [`FederationError::ShutdownInProgress`].
    pub async fn generate_live<F>(
        &self,
        params: &GenerationParams,
        batch_id: &str,
        on_event: F,
    ) -> Result<(), FederationError>
    where
        F: Fn(LiveEvent) + Send + Sync,
    {
        let exact = self.linked_remote_id();
        let on_event = &on_event;

        self.run_with_session(|session| async move {
            let request = params.to_wire_request(&session, exact);
            let mut channel = self.link.transport().open_live(&request).await?;

            let relayed = self.relay_stream(channel.as_mut(), batch_id, on_event).await;
            if let Err(e) = channel.close().await {
                tracing::trace!(backend_id = self.id, error = %e, "Live channel close failed");
            }
            relayed
        })
        .await
    }

    async fn relay_stream<F>(
        &self,
        channel: &mut dyn LiveChannel,
        batch_id: &str,
        on_event: &F,
    ) -> Result<(), FederationError>
    where
        F: Fn(LiveEvent) + Send + Sync,
    {
        let mut images = 0usize;

        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!(backend_id = self.id, "Live generation interrupted by shutdown");
                    return Err(FederationError::ShutdownInProgress);
                }
                message = channel.recv() => message,
            };
            let Some(message) = message else {
                break;
            };

            match classify_stream_message(message?)? {
                StreamMessage::Progress(mut progress) => {
                    progress.insert("batch_index".into(), Value::from(batch_id));
                    on_event(LiveEvent::Progress(Value::Object(progress)));
                }
                StreamMessage::Image(image) => {
                    images += 1;
                    on_event(LiveEvent::Image(image));
                }
                StreamMessage::Failed(message) => {
                    return Err(FederationError::Remote(message));
                }
                StreamMessage::Other(other) => {
                    tracing::trace!(backend_id = self.id, payload = %other, "Ignoring live message");
                }
            }
        }

        if images == 0 {
            tracing::warn!(backend_id = self.id, "Live generation closed without an image");
        }
        Ok(())
    }
}
