//! Integration tests for the ingest endpoint end to end

mod common;

use common::{calendly_invitee_created, post_raw, slack_message, TestRelay};
use serde_json::json;

/// Verify that a URL verification challenge is echoed and nothing is forwarded
#[tokio::test]
async fn test_challenge_is_echoed_and_not_forwarded() {
    // Arrange
    let relay = TestRelay::start().await;
    relay.mount("/default", 200).await;
    relay.mount("/slack", 200).await;

    // Act
    let (status, body) = relay
        .post(&json!({"type": "url_verification", "challenge": "abc123"}))
        .await;

    // Assert
    assert_eq!(status, 200);
    assert_eq!(body, json!({"challenge": "abc123"}));
    assert!(relay
        .downstream
        .received_requests()
        .await
        .unwrap_or_default()
        .is_empty());
    assert!(relay.state.pipeline.cache().is_empty());
}

/// Verify that a redelivered Slack event is forwarded exactly once
#[tokio::test]
async fn test_slack_redelivery_is_forwarded_once() {
    // Arrange
    let relay = TestRelay::start().await;
    relay.mount("/slack", 200).await;
    let event = slack_message("T1", "C1", "1700000000.000100");

    // Act
    let (first_status, first) = relay.post(&event).await;
    let (second_status, second) = relay.post(&event).await;

    // Assert
    assert_eq!(first_status, 200);
    assert_eq!(first["success"], true);
    assert!(first.get("duplicate").is_none());
    assert_eq!(first["forwarded"], "delivered");
    assert_eq!(first["id"], "slack:T1:C1:1700000000.000100");

    assert_eq!(second_status, 200);
    assert_eq!(second["success"], true);
    assert_eq!(second["duplicate"], true);

    let forwarded = relay.received_on("/slack").await;
    assert_eq!(forwarded.len(), 1);

    let request = &forwarded[0];
    assert_eq!(
        request.headers.get("x-relay-event-id").unwrap(),
        "slack:T1:C1:1700000000.000100"
    );
    assert_eq!(request.headers.get("x-relay-source").unwrap(), "slack");
    let payload: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(payload["event"]["channel"], "C1");
}

/// Verify that an edit collapses onto the original Slack message
#[tokio::test]
async fn test_slack_edit_is_treated_as_duplicate_of_original() {
    // Arrange
    let relay = TestRelay::start().await;
    relay.mount("/slack", 200).await;
    let original = slack_message("T1", "C1", "1700000000.000100");
    let edit = json!({
        "type": "event_callback",
        "team_id": "T1",
        "event_id": "Ev-edit",
        "event": {
            "type": "message",
            "subtype": "message_changed",
            "channel": "C1",
            "ts": "1700000999.000200",
            "message": {"ts": "1700000000.000100", "text": "hello (edited)"},
            "previous_message": {"ts": "1700000000.000100", "text": "hello"}
        }
    });

    // Act
    relay.post(&original).await;
    let (_, body) = relay.post(&edit).await;

    // Assert
    assert_eq!(body["duplicate"], true);
    assert_eq!(relay.received_on("/slack").await.len(), 1);
}

/// Verify that the Calendly identity tracks the invitee URI, not the timestamp
#[tokio::test]
async fn test_calendly_identity_uses_resource_uri() {
    // Arrange
    let relay = TestRelay::start().await;
    relay.mount("/calendly", 200).await;

    // Act
    let (_, first) = relay
        .post(&calendly_invitee_created("abc-def-123", "2024-01-01T10:00:00Z"))
        .await;
    let (_, second) = relay
        .post(&calendly_invitee_created("abc-def-123", "2024-01-01T10:05:00Z"))
        .await;

    // Assert
    assert_eq!(first["source"], "calendly");
    assert!(first["id"].as_str().unwrap().contains("abc-def-123"));
    assert_eq!(second["id"], first["id"]);
    assert_eq!(second["duplicate"], true);
    assert_eq!(relay.received_on("/calendly").await.len(), 1);
}

/// Verify that unrecognised payloads are routed to the default endpoint
#[tokio::test]
async fn test_unknown_source_goes_to_default_endpoint() {
    // Arrange
    let relay = TestRelay::start().await;
    relay.mount("/default", 200).await;

    // Act
    let (status, body) = relay.post(&json!({"order": 42, "status": "shipped"})).await;

    // Assert
    assert_eq!(status, 200);
    assert_eq!(body["source"], "unknown");
    assert!(body["id"].as_str().unwrap().starts_with("unknown:"));
    assert_eq!(body["forwarded"], "delivered");
    assert_eq!(relay.received_on("/default").await.len(), 1);
}

/// Verify that Slack interactivity form posts are decoded and forwarded
#[tokio::test]
async fn test_form_encoded_payload_is_decoded() {
    // Arrange
    let relay = TestRelay::start().await;
    relay.mount("/slack", 200).await;
    let payload = json!({
        "type": "block_actions",
        "team": {"id": "T9"},
        "channel": {"id": "C9"},
        "trigger_id": "trig-1",
        "action_ts": "1700000100.000001"
    });
    let encoded: String = url_encode(&payload.to_string());

    // Act
    let (status, body) = relay
        .send(post_raw(
            format!("payload={encoded}"),
            "application/x-www-form-urlencoded",
            &[("x-slack-request-timestamp", "1700000100")],
        ))
        .await;

    // Assert
    assert_eq!(status, 200);
    assert_eq!(body["source"], "slack");
    assert_eq!(body["id"], "slack:trigger:trig-1");
}

/// Verify that undecodable bodies are rejected without forwarding
#[tokio::test]
async fn test_malformed_body_is_rejected() {
    // Arrange
    let relay = TestRelay::start().await;
    relay.mount("/default", 200).await;

    // Act
    let (status, body) = relay
        .send(post_raw("{\"type\": ".to_string(), "application/json", &[]))
        .await;
    let (empty_status, _) = relay
        .send(post_raw(String::new(), "application/json", &[]))
        .await;

    // Assert
    assert_eq!(status, 400);
    assert_eq!(body["status"], 400);
    assert_eq!(empty_status, 400);
    assert!(relay
        .downstream
        .received_requests()
        .await
        .unwrap_or_default()
        .is_empty());
}

fn url_encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}
