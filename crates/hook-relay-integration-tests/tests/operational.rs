//! Integration tests for health, status and metrics endpoints

mod common;

use common::{get, slack_message, TestRelay};

/// Verify that the health endpoint answers with JSON
#[tokio::test]
async fn test_health_endpoint_returns_200() {
    // Arrange
    let relay = TestRelay::start().await;

    // Act
    let (status, body) = relay.send(get("/health")).await;

    // Assert
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
}

/// Verify that readiness reflects a routable default endpoint
#[tokio::test]
async fn test_readiness_endpoint_returns_200_when_routable() {
    // Arrange
    let relay = TestRelay::start().await;

    // Act
    let (status, body) = relay.send(get("/ready")).await;

    // Assert
    assert_eq!(status, 200);
    assert_eq!(body["ready"], true);
}

/// Verify that status summarises routing and the dedup cache
#[tokio::test]
async fn test_status_endpoint_reports_configuration() {
    // Arrange
    let relay = TestRelay::start().await;
    relay.mount("/slack", 200).await;
    relay
        .post(&slack_message("T1", "C1", "1700000000.000900"))
        .await;

    // Act
    let (status, body) = relay.send(get("/status")).await;

    // Assert
    assert_eq!(status, 200);
    assert_eq!(body["service"], "hook-relay");
    assert_eq!(body["environment"], "production");
    assert_eq!(body["dedup"]["entries"], 1);
    assert_eq!(body["routed_sources"], serde_json::json!(["slack", "calendly"]));
}

/// Verify that metrics are exposed in the Prometheus text format
#[tokio::test]
async fn test_metrics_endpoint_counts_outcomes() {
    // Arrange
    use tower::ServiceExt;

    let relay = TestRelay::start().await;
    relay.mount("/slack", 200).await;
    let event = slack_message("T1", "C1", "1700000000.001000");
    relay.post(&event).await;
    relay.post(&event).await;

    // Act
    let response = relay.router.clone().oneshot(get("/metrics")).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    // Assert
    assert!(text.contains("hook_relay_ingress_requests_total{outcome=\"delivered\"} 1"));
    assert!(text.contains("hook_relay_ingress_requests_total{outcome=\"duplicate\"} 1"));
    assert!(text.contains("hook_relay_dedup_hits_total 1"));
    assert!(text.contains("hook_relay_forward_attempts_total 1"));
}
