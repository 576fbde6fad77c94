//! Backend registry contract and an in-memory implementation.
//!
//! The registry owns backend records. Federation only decides *when*
//! proxies are created or deleted; the registry assigns ids, keeps the
//! records and drives their lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hivelink_core::status::BackendStatus;
use hivelink_core::types::{BackendId, RemoteBackendId};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::backend::{FederatedBackend, FederationContext};
use crate::session::PeerLink;

/// Everything needed to build a proxy backend for one remote worker.
pub struct ProxySpec {
    pub link: Arc<PeerLink>,
    pub context: FederationContext,
    pub linked_remote_id: RemoteBackendId,
    pub max_usage_count: u32,
    /// Status changes broadcast by the owning real backend.
    pub owner_status: broadcast::Receiver<BackendStatus>,
    /// Cancelled when the owner shuts down.
    pub owner_cancel: CancellationToken,
}

/// A proxy registered on behalf of a real backend.
#[derive(Clone)]
pub struct ProxyHandle {
    /// Registry id of the proxy record.
    pub id: BackendId,
    pub backend: Arc<FederatedBackend>,
}

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Backend {0} not found")]
    NotFound(BackendId),

    #[error("Registry rejected the request: {0}")]
    Rejected(String),
}

/// The registry operations federation depends on.
#[async_trait]
pub trait BackendRegistry: Send + Sync {
    /// Build, register and start initialising a proxy.
    async fn create_proxy(&self, spec: ProxySpec) -> Result<ProxyHandle, RegistryError>;

    /// Shut down and forget a backend.
    async fn delete_by_id(&self, id: BackendId) -> Result<(), RegistryError>;
}

/// Process-local registry.
///
/// Holds every backend record indexed by id. Proxies are initialised on
/// a background task, the same way records loaded at startup are.
pub struct InMemoryRegistry {
    backends: RwLock<HashMap<BackendId, Arc<FederatedBackend>>>,
    next_id: AtomicI64,
}

impl InMemoryRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            backends: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        })
    }

    /// Reserve a fresh backend id.
    pub fn next_id(&self) -> BackendId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register an already-built backend (used for real backends).
    pub async fn insert(&self, backend: Arc<FederatedBackend>) {
        self.backends.write().await.insert(backend.id(), backend);
    }

    pub async fn get(&self, id: BackendId) -> Option<Arc<FederatedBackend>> {
        self.backends.read().await.get(&id).cloned()
    }

    /// All records ordered by id.
    pub async fn list(&self) -> Vec<Arc<FederatedBackend>> {
        let mut all: Vec<_> = self.backends.read().await.values().cloned().collect();
        all.sort_by_key(|b| b.id());
        all
    }

    pub async fn len(&self) -> usize {
        self.backends.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.backends.read().await.is_empty()
    }

    /// Shut down every backend and empty the registry.
    ///
    /// Real backends go first so that they can delete their own proxies.
    pub async fn shutdown_all(&self) {
        let drained = self.list().await;
        for backend in &drained {
            if backend.is_real() {
                backend.shutdown().await;
            }
        }

        let remaining: Vec<_> = self.backends.write().await.drain().map(|(_, b)| b).collect();
        for backend in remaining {
            backend.shutdown().await;
        }
        tracing::info!(count = drained.len(), "Backend registry shut down");
    }
}

#[async_trait]
impl BackendRegistry for InMemoryRegistry {
    async fn create_proxy(&self, spec: ProxySpec) -> Result<ProxyHandle, RegistryError> {
        if spec.owner_cancel.is_cancelled() {
            return Err(RegistryError::Rejected(
                "owning backend is shutting down".into(),
            ));
        }

        let id = self.next_id();
        let backend = FederatedBackend::new_proxy(id, spec);
        self.insert(Arc::clone(&backend)).await;

        let init_backend = Arc::clone(&backend);
        tokio::spawn(async move {
            if let Err(e) = init_backend.init().await {
                tracing::debug!(backend_id = init_backend.id(), error = %e, "Proxy init failed");
            }
        });

        Ok(ProxyHandle { id, backend })
    }

    async fn delete_by_id(&self, id: BackendId) -> Result<(), RegistryError> {
        let backend = self
            .backends
            .write()
            .await
            .remove(&id)
            .ok_or(RegistryError::NotFound(id))?;
        backend.shutdown().await;
        Ok(())
    }
}
