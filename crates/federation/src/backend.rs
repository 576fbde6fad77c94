//! Federated backend records and their lifecycle.
//!
//! A real backend owns the [`PeerLink`] to a remote instance and a map of
//! proxies, one per running remote sub-worker. A proxy shares the link
//! and routes its calls to a single remote worker id.
//!
//! Lifecycle:
//!
//! ```text
//! Disabled -> Loading -> Running | Idle | Errored
//!                        Running <-> Idle   (health monitor)
//! ```
//!
//! `Disabled` and `Errored` are left only by a restart.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use hivelink_core::identity::InstanceIdentity;
use hivelink_core::status::BackendStatus;
use hivelink_core::types::{BackendId, RemoteBackendId};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{FederationConfig, FederationSettings};
use crate::error::FederationError;
use crate::monitor::{HealthMonitor, HealthProbe};
use crate::reconcile::RemoteSnapshot;
use crate::registry::{BackendRegistry, ProxyHandle, ProxySpec};
use crate::session::PeerLink;
use crate::transport::PeerTransport;

/// Capacity of the owner-to-proxy status channel.
const STATUS_CHANNEL_CAPACITY: usize = 16;

/// Process-wide collaborators shared by every federated backend.
#[derive(Clone)]
pub struct FederationContext {
    pub registry: Arc<dyn BackendRegistry>,
    /// Identity of this process, checked against every peer handshake.
    pub identity: InstanceIdentity,
    pub config: FederationConfig,
    /// Process shutdown signal. Backends derive child tokens from it.
    pub shutdown: CancellationToken,
}

impl FederationContext {
    pub fn new(
        registry: Arc<dyn BackendRegistry>,
        identity: InstanceIdentity,
        config: FederationConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            identity,
            config,
            shutdown,
        }
    }
}

pub(crate) enum BackendRole {
    Real(RealState),
    Proxy(ProxyState),
}

pub(crate) struct RealState {
    /// Proxies keyed by the remote worker id they mirror.
    pub(crate) proxies: Mutex<HashMap<RemoteBackendId, ProxyHandle>>,
    /// Status changes fanned out to every proxy.
    pub(crate) health_tx: broadcast::Sender<BackendStatus>,
    monitor: Mutex<Option<HealthMonitor>>,
    startup: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct ProxyState {
    pub(crate) linked_remote_id: RemoteBackendId,
}

/// A backend entry backed by a remote peer.
pub struct FederatedBackend {
    pub(crate) id: BackendId,
    pub(crate) role: BackendRole,
    pub(crate) link: Arc<PeerLink>,
    pub(crate) context: FederationContext,
    pub(crate) current_model: RwLock<Option<String>>,
    status: watch::Sender<BackendStatus>,
    snapshot: watch::Sender<Arc<RemoteSnapshot>>,
    max_usage_count: AtomicU32,
    pub(crate) cancel: CancellationToken,
    torn_down: AtomicBool,
}

impl FederatedBackend {
    /// Build a real backend for the peer described by `settings`.
    pub fn new_real(
        id: BackendId,
        settings: FederationSettings,
        transport: Arc<dyn PeerTransport>,
        context: FederationContext,
    ) -> Arc<Self> {
        let link = Arc::new(PeerLink::new(settings, transport, context.identity));
        let (health_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let cancel = context.shutdown.child_token();

        Arc::new(Self {
            id,
            role: BackendRole::Real(RealState {
                proxies: Mutex::new(HashMap::new()),
                health_tx,
                monitor: Mutex::new(None),
                startup: Mutex::new(None),
            }),
            link,
            context,
            current_model: RwLock::new(None),
            status: watch::Sender::new(BackendStatus::Disabled),
            snapshot: watch::Sender::new(Arc::new(RemoteSnapshot::initial())),
            max_usage_count: AtomicU32::new(0),
            cancel,
            torn_down: AtomicBool::new(false),
        })
    }

    /// Build a proxy and start mirroring its owner's status.
    pub fn new_proxy(id: BackendId, spec: ProxySpec) -> Arc<Self> {
        let ProxySpec {
            link,
            context,
            linked_remote_id,
            max_usage_count,
            owner_status,
            owner_cancel,
        } = spec;
        let cancel = owner_cancel.child_token();

        let proxy = Arc::new(Self {
            id,
            role: BackendRole::Proxy(ProxyState { linked_remote_id }),
            link,
            context,
            current_model: RwLock::new(None),
            status: watch::Sender::new(BackendStatus::Disabled),
            snapshot: watch::Sender::new(Arc::new(RemoteSnapshot::initial())),
            max_usage_count: AtomicU32::new(max_usage_count),
            cancel: cancel.clone(),
            torn_down: AtomicBool::new(false),
        });

        tokio::spawn(follow_owner(Arc::downgrade(&proxy), owner_status, cancel));
        proxy
    }

    pub fn id(&self) -> BackendId {
        self.id
    }

    /// Whether this backend owns the peer link (as opposed to a proxy).
    pub fn is_real(&self) -> bool {
        matches!(self.role, BackendRole::Real(_))
    }

    /// Remote worker id this proxy routes to; `None` on a real backend.
    pub fn linked_remote_id(&self) -> Option<RemoteBackendId> {
        match &self.role {
            BackendRole::Proxy(proxy) => Some(proxy.linked_remote_id),
            BackendRole::Real(_) => None,
        }
    }

    pub fn address(&self) -> &str {
        self.link.address()
    }

    pub fn allow_idle(&self) -> bool {
        self.link.settings().allow_idle
    }

    pub fn status(&self) -> BackendStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<BackendStatus> {
        self.status.subscribe()
    }

    /// Latest published reconciliation aggregates.
    pub fn snapshot(&self) -> Arc<RemoteSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn supported_features(&self) -> BTreeSet<String> {
        self.snapshot().features.clone()
    }

    pub fn backend_types(&self) -> BTreeSet<String> {
        self.snapshot().backend_types.clone()
    }

    pub async fn current_model_name(&self) -> Option<String> {
        self.current_model.read().await.clone()
    }

    pub fn max_usage_count(&self) -> u32 {
        self.max_usage_count.load(Ordering::Relaxed)
    }

    pub fn set_max_usage_count(&self, count: u32) {
        self.max_usage_count.store(count, Ordering::Relaxed);
    }

    /// Only proxies can load models; a real backend has no single worker.
    pub fn can_load_models(&self) -> bool {
        !self.is_real()
    }

    /// Remote ids of the proxies this backend controls, ascending.
    pub async fn controlled_proxy_ids(&self) -> Vec<RemoteBackendId> {
        let BackendRole::Real(real) = &self.role else {
            return Vec::new();
        };
        let mut ids: Vec<_> = real.proxies.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Proxy mirroring `remote_id`, if one exists.
    pub async fn proxy(&self, remote_id: RemoteBackendId) -> Option<Arc<FederatedBackend>> {
        let BackendRole::Real(real) = &self.role else {
            return None;
        };
        real.proxies
            .lock()
            .await
            .get(&remote_id)
            .map(|handle| Arc::clone(&handle.backend))
    }

    pub(crate) fn publish_snapshot(&self, snapshot: RemoteSnapshot) {
        self.snapshot.send_replace(Arc::new(snapshot));
    }

    pub(crate) fn proxy_spec(
        &self,
        real: &RealState,
        linked_remote_id: RemoteBackendId,
        max_usage_count: u32,
    ) -> ProxySpec {
        ProxySpec {
            link: Arc::clone(&self.link),
            context: self.context.clone(),
            linked_remote_id,
            max_usage_count,
            owner_status: real.health_tx.subscribe(),
            owner_cancel: self.cancel.clone(),
        }
    }

    /// Change status, logging and fanning out real-backend changes to the
    /// proxies. Returns whether anything changed.
    fn set_status(&self, next: BackendStatus) -> bool {
        let previous = self.status();
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if !changed {
            return false;
        }

        tracing::info!(
            backend_id = self.id,
            from = %previous,
            to = %next,
            "Backend status changed",
        );
        if let BackendRole::Real(real) = &self.role {
            // No receivers just means there are no proxies yet.
            let _ = real.health_tx.send(next);
        }
        true
    }

    /// Run `op` with the current session token, rebuilding the session
    /// whenever the peer reports it invalid.
    ///
    /// Rebuilds are capped by the retry policy; the first one is
    /// immediate and later ones back off. `SessionInvalid` never escapes:
    /// it becomes `SessionRetriesExhausted` once the cap is hit.
    pub(crate) async fn run_with_session<T, F, Fut>(&self, op: F) -> Result<T, FederationError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, FederationError>>,
    {
        let policy = &self.context.config.retry;
        let mut rebuilds = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(FederationError::ShutdownInProgress);
            }

            let session = self.link.ensure_session().await?;
            match op(session).await {
                Err(FederationError::SessionInvalid) => {}
                other => return other,
            }

            if rebuilds >= policy.max_session_rebuilds {
                tracing::warn!(
                    backend_id = self.id,
                    address = %self.address(),
                    attempts = rebuilds,
                    "Peer keeps rejecting new sessions, giving up",
                );
                return Err(FederationError::SessionRetriesExhausted { attempts: rebuilds });
            }
            rebuilds += 1;

            let delay = policy.delay_before(rebuilds);
            if !delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(FederationError::ShutdownInProgress),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            tracing::debug!(
                backend_id = self.id,
                rebuild = rebuilds,
                "Remote session invalid, rebuilding",
            );
            self.rebuild_session().await?;
        }
    }

    /// Fresh handshake followed by one raw reconciliation pass.
    async fn rebuild_session(&self) -> Result<(), FederationError> {
        let info = self.link.handshake().await?;
        match self.reconcile_pass(info.session_id).await {
            // The caller's loop will rebuild again if needed.
            Ok(()) | Err(FederationError::SessionInvalid) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Handshake with the peer and run the first reconciliation pass.
    pub async fn validate_and_build(&self) -> Result<(), FederationError> {
        let info = self.link.handshake().await?;
        self.snapshot.send_modify(|snapshot| {
            Arc::make_mut(snapshot).backend_count = info.count_running as usize;
        });
        self.reconcile().await
    }

    /// Drive startup. Returns once the backend has left `Loading` or, for
    /// a real backend, once background startup polling has been spawned.
    pub async fn init(self: &Arc<Self>) -> Result<(), FederationError> {
        if !self.link.settings().is_configured() {
            tracing::info!(backend_id = self.id, "No peer address configured, backend disabled");
            self.set_status(BackendStatus::Disabled);
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(FederationError::ShutdownInProgress);
        }

        self.set_status(BackendStatus::Loading);
        match &self.role {
            BackendRole::Proxy(_) => self.init_proxy().await,
            BackendRole::Real(real) => self.init_real(real).await,
        }
    }

    async fn init_proxy(&self) -> Result<(), FederationError> {
        match self.reconcile().await {
            Ok(()) => {
                self.transition(BackendStatus::Loading, BackendStatus::Running);
                Ok(())
            }
            Err(e) => self.fail_startup(e),
        }
    }

    async fn init_real(self: &Arc<Self>, real: &RealState) -> Result<(), FederationError> {
        tracing::info!(backend_id = self.id, address = %self.address(), "Connecting to peer");

        if let Err(e) = self.validate_and_build().await {
            self.fail_startup(e)?;
            self.start_monitor(real).await;
            return Ok(());
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.finish_startup().await });
        *real.startup.lock().await = Some(handle);
        Ok(())
    }

    /// Poll until the peer reports no loading worker, then settle.
    async fn finish_startup(self: Arc<Self>) {
        let BackendRole::Real(real) = &self.role else {
            return;
        };
        let poll = self.context.config.startup_poll_interval;

        let mut outcome = Ok(());
        while self.snapshot().any_loading && self.status() == BackendStatus::Loading {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(poll) => {}
            }
            if let Err(e) = self.reconcile().await {
                outcome = Err(e);
                break;
            }
        }
        if self.cancel.is_cancelled() {
            return;
        }

        match outcome {
            Ok(()) => {
                self.transition(BackendStatus::Loading, BackendStatus::Running);
            }
            Err(e) => {
                if self.fail_startup(e).is_err() {
                    return;
                }
            }
        }
        self.start_monitor(real).await;
    }

    /// Map a startup failure to `Idle` (returns `Ok`) or `Errored`.
    fn fail_startup(&self, error: FederationError) -> Result<(), FederationError> {
        if matches!(error, FederationError::ShutdownInProgress) {
            return Err(error);
        }
        if self.allow_idle() && !error.is_fatal() {
            tracing::warn!(
                backend_id = self.id,
                address = %self.address(),
                error = %error,
                "Peer unavailable, backend idle until it answers",
            );
            self.transition(BackendStatus::Loading, BackendStatus::Idle);
            return Ok(());
        }

        tracing::error!(
            backend_id = self.id,
            address = %self.address(),
            error = %error,
            "Backend failed to start",
        );
        self.transition(BackendStatus::Loading, BackendStatus::Errored);
        Err(error)
    }

    /// Set `to` only if the backend is still in `from`.
    fn transition(&self, from: BackendStatus, to: BackendStatus) -> bool {
        if self.status() != from {
            return false;
        }
        self.set_status(to)
    }

    async fn start_monitor(self: &Arc<Self>, real: &RealState) {
        if !self.allow_idle() || self.cancel.is_cancelled() {
            return;
        }
        let mut slot = real.monitor.lock().await;
        if slot.is_some() {
            return;
        }
        *slot = Some(HealthMonitor::start(
            Arc::downgrade(self),
            self.context.config.idle_check_interval,
            &self.cancel,
        ));
        tracing::debug!(backend_id = self.id, "Health monitor started");
    }

    /// Push this backend's status to any proxy that drifted from it.
    ///
    /// Covers proxies whose own init failed while the owner stayed
    /// healthy. Proxies still loading or in a terminal state are left
    /// alone.
    pub(crate) async fn resync_proxies(&self) {
        let BackendRole::Real(real) = &self.role else {
            return;
        };
        let owner = self.status();
        if !matches!(owner, BackendStatus::Running | BackendStatus::Idle) {
            return;
        }

        let proxies: Vec<_> = real
            .proxies
            .lock()
            .await
            .values()
            .map(|handle| Arc::clone(&handle.backend))
            .collect();
        for proxy in proxies {
            let current = proxy.status();
            if current == owner || !matches!(current, BackendStatus::Running | BackendStatus::Idle) {
                continue;
            }
            tracing::debug!(
                backend_id = self.id,
                proxy_id = proxy.id,
                from = %current,
                to = %owner,
                "Resyncing proxy with owner status",
            );
            proxy.set_status(owner);
        }
    }

    /// Stop background work, delete owned proxies and mark the backend
    /// `Disabled`. Safe to call more than once, and before `init`.
    pub async fn shutdown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let grace = self.context.config.shutdown_grace;

        if let BackendRole::Real(real) = &self.role {
            if let Some(mut monitor) = real.monitor.lock().await.take() {
                monitor.stop(grace).await;
            }
            if let Some(handle) = real.startup.lock().await.take() {
                if tokio::time::timeout(grace, handle).await.is_err() {
                    tracing::warn!(backend_id = self.id, "Startup task did not stop in time");
                }
            }

            let proxies: Vec<_> = real.proxies.lock().await.drain().map(|(_, h)| h).collect();
            for handle in proxies {
                if let Err(e) = self.context.registry.delete_by_id(handle.id).await {
                    tracing::debug!(
                        backend_id = self.id,
                        proxy_id = handle.id,
                        error = %e,
                        "Proxy already gone",
                    );
                }
            }
            self.link.clear().await;
        }

        self.set_status(BackendStatus::Disabled);
        tracing::debug!(backend_id = self.id, "Backend shut down");
    }
}

/// Mirror the owner's status changes onto a proxy until either side
/// goes away.
async fn follow_owner(
    proxy: Weak<FederatedBackend>,
    mut owner_status: broadcast::Receiver<BackendStatus>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            received = owner_status.recv() => match received {
                Ok(status) => status,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::trace!(skipped, "Proxy status follower lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        let Some(proxy) = proxy.upgrade() else {
            break;
        };
        if proxy.status().is_terminal() || next == BackendStatus::Disabled {
            continue;
        }
        proxy.set_status(next);
    }
}

#[async_trait]
impl HealthProbe for FederatedBackend {
    fn backend_id(&self) -> BackendId {
        self.id
    }

    async fn validate(&self) -> Result<(), FederationError> {
        self.reconcile().await
    }

    fn current_status(&self) -> BackendStatus {
        self.status()
    }

    fn apply_status(&self, status: BackendStatus) {
        self.set_status(status);
    }

    async fn resync(&self) {
        self.resync_proxies().await;
    }
}
