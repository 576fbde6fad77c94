//! Integration tests for the node status routes.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{body_json, build_test_node, get, StaticPeer};
use hivelink_core::status::BackendStatus;

async fn wait_running(node: &common::TestNode) {
    let mut rx = node.backend.subscribe_status();
    tokio::time::timeout(
        Duration::from_secs(3),
        rx.wait_for(|status| *status == BackendStatus::Running),
    )
    .await
    .expect("backend should start")
    .expect("status channel open");
}

// ---------------------------------------------------------------------------
// Test: GET /health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_ok_before_any_backend_runs() {
    let node = build_test_node(StaticPeer::with_workers(&[])).await;

    let response = get(node.app.clone(), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["peers_configured"], 1);
    assert_eq!(json["backends_running"], 0);
}

#[tokio::test]
async fn health_counts_only_running_backends() {
    let node = build_test_node(StaticPeer::with_workers(&[0, 4])).await;
    node.backend.init().await.unwrap();
    wait_running(&node).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let json = body_json(get(node.app.clone(), "/health").await).await;
        if json["backends_running"] == 3 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "proxies never started: {json}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    node.backend.shutdown().await;
    let json = body_json(get(node.app.clone(), "/health").await).await;
    assert_eq!(json["backends_running"], 0);

    node.registry.shutdown_all().await;
}

// ---------------------------------------------------------------------------
// Test: GET /backends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn backends_lists_real_backend_and_its_proxies() {
    let node = build_test_node(StaticPeer::with_workers(&[0, 4])).await;
    node.backend.init().await.unwrap();
    wait_running(&node).await;

    let json = body_json(get(node.app.clone(), "/backends").await).await;
    let entries = json.as_array().expect("array of backends");
    assert_eq!(entries.len(), 3);

    let real = &entries[0];
    assert_eq!(real["role"], "real");
    assert_eq!(real["status"], "running");
    assert_eq!(real["proxies"], serde_json::json!([0, 4]));
    assert_eq!(real["features"], serde_json::json!(["sdxl"]));
    assert!(real["linked_remote_id"].is_null());

    let linked: Vec<_> = entries[1..]
        .iter()
        .map(|e| {
            assert_eq!(e["role"], "proxy");
            e["linked_remote_id"].as_i64().unwrap()
        })
        .collect();
    assert_eq!(linked, vec![0, 4]);

    node.registry.shutdown_all().await;
}

#[tokio::test]
async fn single_backend_lookup() {
    let node = build_test_node(StaticPeer::with_workers(&[])).await;
    let id = node.backend.id();

    let response = get(node.app.clone(), &format!("/backends/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["id"], id);
    assert_eq!(json["status"], "disabled");
}

#[tokio::test]
async fn unknown_backend_is_404() {
    let node = build_test_node(StaticPeer::with_workers(&[])).await;

    let response = get(node.app.clone(), "/backends/999").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
}
