use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use hivelink_core::identity::InstanceIdentity;
use hivelink_federation::api::PeerApi;
use hivelink_federation::transport::PeerTransport;
use hivelink_federation::{BackendRegistry, FederatedBackend, FederationContext, InMemoryRegistry};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hivelink_node::config::NodeConfig;
use hivelink_node::router::build_app_router;
use hivelink_node::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hivelink_node=info,hivelink_federation=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = NodeConfig::from_env().context("Invalid node configuration")?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        peers = config.peers.len(),
        allow_idle = config.allow_idle,
        "Loaded node configuration",
    );

    // --- Federation ---
    let identity = InstanceIdentity::generate();
    let shutdown = CancellationToken::new();
    let registry = InMemoryRegistry::new();
    let federation_config = config.federation_config();
    let context = FederationContext::new(
        Arc::clone(&registry) as Arc<dyn BackendRegistry>,
        identity,
        federation_config.clone(),
        shutdown.clone(),
    );
    tracing::info!(%identity, "Federation identity generated");

    for settings in config.peer_settings() {
        let transport = PeerApi::new(settings.base_url(), federation_config.request_timeout)
            .with_context(|| format!("Failed to build client for {}", settings.address))?;
        let backend = FederatedBackend::new_real(
            registry.next_id(),
            settings,
            Arc::new(transport) as Arc<dyn PeerTransport>,
            context.clone(),
        );
        registry.insert(Arc::clone(&backend)).await;

        tokio::spawn(async move {
            if let Err(e) = backend.init().await {
                tracing::debug!(backend_id = backend.id(), error = %e, "Backend init ended with error");
            }
        });
    }

    // --- Router ---
    let state = AppState {
        config: Arc::new(config.clone()),
        registry: Arc::clone(&registry),
    };
    let app = build_app_router(state);

    // --- Start server ---
    let host = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting status server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, shutting down backends");
    shutdown.cancel();
    registry.shutdown_all().await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or (on Unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
