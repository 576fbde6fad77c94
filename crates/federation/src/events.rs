//! Events emitted to callers of a live generation.

use serde_json::Value;

use crate::image::GeneratedImage;

/// One event relayed from a live generation.
///
/// A successful stream yields zero or more [`Progress`](Self::Progress)
/// events followed by one [`Image`](Self::Image). When the session has
/// to be rebuilt mid-stream the whole generation is restarted, so a
/// caller can see the progress sequence start over.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// Progress object from the peer, tagged with the caller's
    /// `batch_index`.
    Progress(Value),
    /// The generated image.
    Image(GeneratedImage),
}

impl LiveEvent {
    /// Whether this is the final image of the generation.
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image(_))
    }
}
