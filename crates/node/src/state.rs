use std::sync::Arc;

use hivelink_federation::InMemoryRegistry;

use crate::config::NodeConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Node configuration.
    pub config: Arc<NodeConfig>,
    /// Every backend record on this node, real and proxy.
    pub registry: Arc<InMemoryRegistry>,
}
