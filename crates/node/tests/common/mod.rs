#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use hivelink_core::identity::InstanceIdentity;
use hivelink_core::types::RemoteBackendId;
use hivelink_federation::error::FederationError;
use hivelink_federation::image::GeneratedImage;
use hivelink_federation::messages::{HandshakeInfo, RemoteStatus, SubBackendDescriptor};
use hivelink_federation::transport::{LiveChannel, PeerTransport};
use hivelink_federation::{
    BackendRegistry, FederatedBackend, FederationConfig, FederationContext, FederationSettings,
    InMemoryRegistry,
};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use hivelink_node::config::NodeConfig;
use hivelink_node::router::build_app_router;
use hivelink_node::state::AppState;

/// Peer that always reports the same running workers.
pub struct StaticPeer {
    workers: Vec<SubBackendDescriptor>,
}

impl StaticPeer {
    pub fn with_workers(ids: &[RemoteBackendId]) -> Arc<Self> {
        let workers = ids
            .iter()
            .map(|&id| SubBackendDescriptor {
                id,
                status: RemoteStatus::Running,
                backend_type: "comfyui".into(),
                features: ["sdxl".to_string()].into_iter().collect(),
                max_usage_count: 1,
            })
            .collect();
        Arc::new(Self { workers })
    }
}

#[async_trait]
impl PeerTransport for StaticPeer {
    fn address(&self) -> &str {
        "http://static.test:7801"
    }

    async fn new_session(&self) -> Result<HandshakeInfo, FederationError> {
        Ok(HandshakeInfo {
            session_id: "static".into(),
            server_id: None,
            count_running: self.workers.len() as u32,
        })
    }

    async fn list_backends(
        &self,
        _session_id: &str,
    ) -> Result<Vec<SubBackendDescriptor>, FederationError> {
        Ok(self.workers.clone())
    }

    async fn select_model(
        &self,
        _session_id: &str,
        _model: &str,
        _backend_id: RemoteBackendId,
    ) -> Result<bool, FederationError> {
        Ok(true)
    }

    async fn generate(&self, _request: &serde_json::Value) -> Result<Vec<GeneratedImage>, FederationError> {
        Ok(Vec::new())
    }

    async fn open_live(
        &self,
        _request: &serde_json::Value,
    ) -> Result<Box<dyn LiveChannel>, FederationError> {
        Err(FederationError::RemoteProtocol("live generation not scripted".into()))
    }
}

pub fn test_config() -> NodeConfig {
    NodeConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        peers: vec!["http://static.test:7801".to_string()],
        allow_idle: false,
        idle_check_interval_secs: 1,
        request_timeout_secs: 5,
        session_retry_limit: 5,
        shutdown_timeout_secs: 1,
    }
}

/// A registry with one real backend in front of a [`StaticPeer`].
pub struct TestNode {
    pub app: Router,
    pub registry: Arc<InMemoryRegistry>,
    pub backend: Arc<FederatedBackend>,
}

pub async fn build_test_node(peer: Arc<StaticPeer>) -> TestNode {
    let config = test_config();
    let registry = InMemoryRegistry::new();
    let context = FederationContext::new(
        Arc::clone(&registry) as Arc<dyn BackendRegistry>,
        InstanceIdentity::generate(),
        FederationConfig {
            startup_poll_interval: Duration::from_millis(10),
            ..config.federation_config()
        },
        CancellationToken::new(),
    );
    let backend = FederatedBackend::new_real(
        registry.next_id(),
        FederationSettings::new("http://static.test:7801"),
        peer as Arc<dyn PeerTransport>,
        context,
    );
    registry.insert(Arc::clone(&backend)).await;

    let state = AppState {
        config: Arc::new(config),
        registry: Arc::clone(&registry),
    };
    TestNode {
        app: build_app_router(state),
        registry,
        backend,
    }
}

/// Issue a GET request against the router.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
