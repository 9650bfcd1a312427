//! Integration tests for downstream fallback handling

mod common;

use common::{slack_message, TestRelay};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

/// Verify that a failing primary falls through to the source fallback
#[tokio::test]
async fn test_fallback_receives_event_when_primary_fails() {
    // Arrange
    let relay = TestRelay::start().await;
    relay.mount("/slack", 503).await;
    relay.mount("/slack-backup", 200).await;
    relay.mount("/default", 200).await;

    // Act
    let (status, body) = relay
        .post(&slack_message("T1", "C1", "1700000000.000500"))
        .await;

    // Assert
    assert_eq!(status, 200);
    assert_eq!(body["forwarded"], "delivered");
    assert_eq!(relay.received_on("/slack").await.len(), 1);
    assert_eq!(relay.received_on("/slack-backup").await.len(), 1);
    assert!(relay.received_on("/default").await.is_empty());
    assert!(relay.notifier.errors().is_empty());
}

/// Verify that exhausting every endpoint still answers 200 and alerts operators
#[tokio::test]
async fn test_exhausted_chain_is_reported_through_notifier() {
    // Arrange
    let relay = TestRelay::start().await;
    relay.mount("/slack", 500).await;
    relay.mount("/slack-backup", 502).await;
    relay.mount("/default", 404).await;

    // Act
    let (status, body) = relay
        .post(&slack_message("T1", "C1", "1700000000.000600"))
        .await;

    // Assert
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["forwarded"], "failed");

    // Primary, source fallback, then the default endpoint
    assert_eq!(relay.received_on("/slack").await.len(), 1);
    assert_eq!(relay.received_on("/slack-backup").await.len(), 1);
    assert_eq!(relay.received_on("/default").await.len(), 1);

    let errors = relay.notifier.errors();
    assert_eq!(errors.len(), 1);
    let data = errors[0].1.data.clone().unwrap();
    assert_eq!(data["identity"], "slack:T1:C1:1700000000.000600");
    assert_eq!(data["attempts"], 3);
}

/// Verify that a failed forward keeps the identity, so redeliveries stay suppressed
#[tokio::test]
async fn test_failed_event_is_not_forwarded_again() {
    // Arrange
    let relay = TestRelay::start().await;
    relay.mount("/slack", 500).await;
    let event = slack_message("T1", "C1", "1700000000.000700");

    // Act
    relay.post(&event).await;
    let (_, again) = relay.post(&event).await;

    // Assert
    assert_eq!(again["duplicate"], true);
    assert_eq!(relay.received_on("/slack").await.len(), 1);
}

/// Verify that a slow downstream does not hold the caller past the deadline
#[tokio::test]
async fn test_slow_downstream_is_reported_pending() {
    // Arrange
    let relay = TestRelay::start_with(|config| {
        config.forwarding.attempt_timeout_ms = 300;
        config.forwarding.ingress_deadline_ms = 300;
    })
    .await;
    for route in ["/slack", "/slack-backup"] {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&relay.downstream)
            .await;
    }

    // Act
    let (status, body) = relay
        .post(&slack_message("T1", "C1", "1700000000.000800"))
        .await;

    // Assert
    assert_eq!(status, 200);
    assert_eq!(body["forwarded"], "pending");
    assert!(relay
        .notifier
        .messages()
        .iter()
        .any(|(message, options)| !options.is_error && message.contains("pending")));

    // The chain keeps going in the background and its failure is still reported
    for _ in 0..100 {
        if !relay.notifier.errors().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(relay.notifier.errors().len(), 1);
}
