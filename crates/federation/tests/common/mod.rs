//! Shared fixtures for federation integration tests.
//!
//! [`ScriptedPeer`] is an in-process stand-in for a remote instance. It
//! tracks issued session tokens, reports a configurable worker list and
//! records every request so tests can assert on the wire shape.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hivelink_core::identity::InstanceIdentity;
use hivelink_core::status::BackendStatus;
use hivelink_core::types::RemoteBackendId;
use hivelink_federation::error::FederationError;
use hivelink_federation::image::GeneratedImage;
use hivelink_federation::messages::{HandshakeInfo, RemoteStatus, SubBackendDescriptor};
use hivelink_federation::retry::RetryPolicy;
use hivelink_federation::transport::{LiveChannel, PeerTransport};
use hivelink_federation::{
    BackendRegistry, FederatedBackend, FederationConfig, FederationContext, FederationSettings,
    InMemoryRegistry,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

pub const PEER_ADDRESS: &str = "http://peer.test:7801";

/// `data:` URL of a tiny payload (`"hello"`).
pub const IMAGE_DATA_URL: &str = "data:image/png;base64,aGVsbG8=";

// ---------------------------------------------------------------------------
// Scripted peer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PeerState {
    reachable: bool,
    server_id: Option<String>,
    sessions: HashSet<String>,
    issued: u32,
    always_invalid: bool,
    select_succeeds: bool,
    workers: Vec<SubBackendDescriptor>,
    live_scripts: VecDeque<Vec<Value>>,
    live_stalls: bool,
    list_skip: usize,
    list_failures: usize,
    generate_requests: Vec<Value>,
    live_requests: Vec<Value>,
    select_requests: Vec<(String, RemoteBackendId)>,
    handshakes: usize,
    list_calls: usize,
    channels_closed: usize,
}

/// In-process peer implementing [`PeerTransport`].
pub struct ScriptedPeer {
    state: Arc<Mutex<PeerState>>,
}

impl ScriptedPeer {
    pub fn new(workers: Vec<SubBackendDescriptor>) -> Arc<Self> {
        let state = PeerState {
            reachable: true,
            select_succeeds: true,
            workers,
            ..Default::default()
        };
        Arc::new(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().reachable = reachable;
    }

    pub fn set_server_id(&self, server_id: impl Into<String>) {
        self.state.lock().unwrap().server_id = Some(server_id.into());
    }

    pub fn set_workers(&self, workers: Vec<SubBackendDescriptor>) {
        self.state.lock().unwrap().workers = workers;
    }

    /// Swap the worker list and, in the same step, fail `count` listing
    /// calls after letting `skip` of them through.
    pub fn set_workers_failing_lists(
        &self,
        workers: Vec<SubBackendDescriptor>,
        skip: usize,
        count: usize,
    ) {
        let mut state = self.state.lock().unwrap();
        state.workers = workers;
        state.list_skip = skip;
        state.list_failures = count;
    }

    pub fn pending_list_failures(&self) -> usize {
        self.state.lock().unwrap().list_failures
    }

    /// Keep live channels open, silent, once their script runs out.
    pub fn set_live_stalls(&self, stalls: bool) {
        self.state.lock().unwrap().live_stalls = stalls;
    }

    pub fn set_select_succeeds(&self, succeeds: bool) {
        self.state.lock().unwrap().select_succeeds = succeeds;
    }

    /// Forget every issued token, as a restarted peer would.
    pub fn invalidate_sessions(&self) {
        self.state.lock().unwrap().sessions.clear();
    }

    /// Reject every session, including freshly issued ones.
    pub fn set_always_invalid(&self, always_invalid: bool) {
        self.state.lock().unwrap().always_invalid = always_invalid;
    }

    /// Queue the messages for the next live generation. The last queued
    /// script is reused once the queue runs dry.
    pub fn push_live_script(&self, messages: Vec<Value>) {
        self.state.lock().unwrap().live_scripts.push_back(messages);
    }

    pub fn handshakes(&self) -> usize {
        self.state.lock().unwrap().handshakes
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn generate_requests(&self) -> Vec<Value> {
        self.state.lock().unwrap().generate_requests.clone()
    }

    pub fn live_requests(&self) -> Vec<Value> {
        self.state.lock().unwrap().live_requests.clone()
    }

    pub fn select_requests(&self) -> Vec<(String, RemoteBackendId)> {
        self.state.lock().unwrap().select_requests.clone()
    }

    pub fn channels_closed(&self) -> usize {
        self.state.lock().unwrap().channels_closed
    }

    fn check(state: &PeerState, session_id: &str) -> Result<(), FederationError> {
        if !state.reachable {
            return Err(FederationError::Connection("connection refused".into()));
        }
        if state.always_invalid || !state.sessions.contains(session_id) {
            return Err(FederationError::SessionInvalid);
        }
        Ok(())
    }

    fn request_session(request: &Value) -> &str {
        request
            .get("session_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

#[async_trait]
impl PeerTransport for ScriptedPeer {
    fn address(&self) -> &str {
        PEER_ADDRESS
    }

    async fn new_session(&self) -> Result<HandshakeInfo, FederationError> {
        let mut state = self.state.lock().unwrap();
        if !state.reachable {
            return Err(FederationError::Connection("connection refused".into()));
        }
        state.handshakes += 1;
        state.issued += 1;
        let session_id = format!("session-{}", state.issued);
        state.sessions.insert(session_id.clone());

        let count_running = state
            .workers
            .iter()
            .filter(|w| w.status == RemoteStatus::Running)
            .count() as u32;
        Ok(HandshakeInfo {
            session_id,
            server_id: state.server_id.clone(),
            count_running,
        })
    }

    async fn list_backends(
        &self,
        session_id: &str,
    ) -> Result<Vec<SubBackendDescriptor>, FederationError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        Self::check(&state, session_id)?;
        if state.list_failures > 0 {
            if state.list_skip > 0 {
                state.list_skip -= 1;
            } else {
                state.list_failures -= 1;
                return Err(FederationError::Connection("connection reset".into()));
            }
        }
        Ok(state.workers.clone())
    }

    async fn select_model(
        &self,
        session_id: &str,
        model: &str,
        backend_id: RemoteBackendId,
    ) -> Result<bool, FederationError> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state, session_id)?;
        state.select_requests.push((model.to_string(), backend_id));
        Ok(state.select_succeeds)
    }

    async fn generate(&self, request: &Value) -> Result<Vec<GeneratedImage>, FederationError> {
        let mut state = self.state.lock().unwrap();
        state.generate_requests.push(request.clone());
        Self::check(&state, Self::request_session(request))?;
        Ok(vec![GeneratedImage::from_encoded(IMAGE_DATA_URL)?])
    }

    async fn open_live(&self, request: &Value) -> Result<Box<dyn LiveChannel>, FederationError> {
        let mut state = self.state.lock().unwrap();
        state.live_requests.push(request.clone());
        Self::check(&state, Self::request_session(request))?;

        let script = if state.live_scripts.len() > 1 {
            state.live_scripts.pop_front().unwrap_or_default()
        } else {
            state.live_scripts.front().cloned().unwrap_or_default()
        };
        Ok(Box::new(ScriptedChannel {
            messages: script.into(),
            stalls: state.live_stalls,
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedChannel {
    messages: VecDeque<Value>,
    stalls: bool,
    state: Arc<Mutex<PeerState>>,
}

#[async_trait]
impl LiveChannel for ScriptedChannel {
    async fn recv(&mut self) -> Option<Result<Value, FederationError>> {
        match self.messages.pop_front() {
            Some(message) => Some(Ok(message)),
            None if self.stalls => std::future::pending().await,
            None => None,
        }
    }

    async fn close(&mut self) -> Result<(), FederationError> {
        self.state.lock().unwrap().channels_closed += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Remote worker descriptor.
pub fn worker(
    id: RemoteBackendId,
    status: RemoteStatus,
    kind: &str,
    features: &[&str],
) -> SubBackendDescriptor {
    SubBackendDescriptor {
        id,
        status,
        backend_type: kind.to_string(),
        features: features.iter().map(|f| f.to_string()).collect(),
        max_usage_count: 1,
    }
}

pub fn progress(step: u32) -> Value {
    json!({ "gen_progress": { "current_percent": step, "overall_percent": step } })
}

pub fn live_image() -> Value {
    json!({ "image": IMAGE_DATA_URL })
}

/// Short intervals so lifecycle tests finish quickly.
pub fn fast_config() -> FederationConfig {
    FederationConfig {
        startup_poll_interval: Duration::from_millis(10),
        idle_check_interval: Duration::from_millis(20),
        request_timeout: Duration::from_secs(1),
        shutdown_grace: Duration::from_secs(1),
        retry: RetryPolicy {
            max_session_rebuilds: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        },
    }
}

/// A registry with one real backend pointed at a scripted peer.
pub struct Harness {
    pub registry: Arc<InMemoryRegistry>,
    pub backend: Arc<FederatedBackend>,
    pub peer: Arc<ScriptedPeer>,
    pub identity: InstanceIdentity,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub async fn new(peer: Arc<ScriptedPeer>, allow_idle: bool) -> Self {
        Self::with_address(peer, PEER_ADDRESS, allow_idle).await
    }

    pub async fn with_address(peer: Arc<ScriptedPeer>, address: &str, allow_idle: bool) -> Self {
        let registry = InMemoryRegistry::new();
        let identity = InstanceIdentity::generate();
        let shutdown = CancellationToken::new();
        let context = FederationContext::new(
            Arc::clone(&registry) as Arc<dyn BackendRegistry>,
            identity,
            fast_config(),
            shutdown.clone(),
        );

        let settings = FederationSettings::new(address).with_allow_idle(allow_idle);
        let transport = Arc::clone(&peer) as Arc<dyn PeerTransport>;
        let backend = FederatedBackend::new_real(registry.next_id(), settings, transport, context);
        registry.insert(Arc::clone(&backend)).await;

        Self {
            registry,
            backend,
            peer,
            identity,
            shutdown,
        }
    }

    /// Initialise the real backend and wait until it and every proxy run.
    pub async fn start(&self) {
        self.backend.init().await.expect("init should succeed");
        wait_for_status(&self.backend, BackendStatus::Running).await;
        for remote_id in self.backend.controlled_proxy_ids().await {
            let proxy = self.proxy(remote_id).await;
            wait_for_status(&proxy, BackendStatus::Running).await;
        }
    }

    pub async fn proxy(&self, remote_id: RemoteBackendId) -> Arc<FederatedBackend> {
        self.backend
            .proxy(remote_id)
            .await
            .unwrap_or_else(|| panic!("no proxy for remote backend {remote_id}"))
    }
}

// ---------------------------------------------------------------------------
// Waiting helpers
// ---------------------------------------------------------------------------

const WAIT_LIMIT: Duration = Duration::from_secs(3);

/// Wait until `backend` reports `status`.
pub async fn wait_for_status(backend: &FederatedBackend, status: BackendStatus) {
    let mut rx = backend.subscribe_status();
    let reached = tokio::time::timeout(WAIT_LIMIT, async {
        rx.wait_for(|current| *current == status).await.is_ok()
    })
    .await;
    assert!(
        matches!(reached, Ok(true)),
        "backend {} never reached {status}, stuck at {}",
        backend.id(),
        backend.status(),
    );
}

/// Poll `condition` until it holds.
pub async fn wait_until<F, Fut>(what: &str, condition: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !condition().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
