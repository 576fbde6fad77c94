//! Federation layer: treat another instance's worker pool as local backends.
//!
//! A *real* [`FederatedBackend`](backend::FederatedBackend) is configured
//! with the address of a remote peer. It holds the session for that peer,
//! polls the remote worker list, and mirrors every running remote
//! sub-worker as a *proxy* backend registered with the
//! [`BackendRegistry`](registry::BackendRegistry). Proxies share the real
//! backend's [`PeerLink`](session::PeerLink) and route generation requests
//! to their one remote worker.
//!
//! Wire access goes through the [`PeerTransport`](transport::PeerTransport)
//! seam; [`PeerApi`](api::PeerApi) is the HTTP/WebSocket implementation.

pub mod api;
pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod image;
pub mod live;
pub mod messages;
pub mod monitor;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod session;
pub mod transport;

pub use backend::{FederatedBackend, FederationContext};
pub use config::{FederationConfig, FederationSettings};
pub use error::FederationError;
pub use registry::{BackendRegistry, InMemoryRegistry, ProxyHandle, ProxySpec};
