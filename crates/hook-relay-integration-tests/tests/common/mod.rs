//! Common test utilities for hook-relay integration tests
//!
//! This module provides:
//! - A relay harness wired to `wiremock` downstream servers
//! - A notifier that records what it was told
//! - Request builders and payload fixtures

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use hook_relay_api::{
    create_router, AppState, HttpSubscriptionConfirmer, ServiceConfig, ServiceMetrics,
    SubscriptionConfig,
};
use hook_relay_core::endpoint::SourceEndpoints;
use hook_relay_core::{
    EndpointConfig, EndpointResolver, Environment, ForwardConfig, HttpForwarder,
    IdempotencyCache, IngressPipeline, Notifier, NotifyOptions, VerificationConfig,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request as RecordedRequest, ResponseTemplate};

/// Topic the relay trusts; [`pubsub_notification`] publishes on it
pub const RELAY_TOPIC_ARN: &str = "arn:aws:sns:us-east-1:123456789012:relay";

// ============================================================================
// Recording Notifier
// ============================================================================

/// Notifier keeping every message for later assertions
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, NotifyOptions)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, NotifyOptions)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(String, NotifyOptions)> {
        self.messages()
            .into_iter()
            .filter(|(_, options)| options.is_error)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, options: NotifyOptions) {
        self.messages
            .lock()
            .unwrap()
            .push((message.to_string(), options));
    }
}

// ============================================================================
// Relay Harness
// ============================================================================

/// Router plus the downstream servers and notifier behind it
pub struct TestRelay {
    pub router: axum::Router,
    pub state: AppState,
    pub downstream: MockServer,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestRelay {
    /// Relay in production with per-source routes on one mock server
    ///
    /// - `/slack` for Slack, with `/slack-backup` as its fallback
    /// - `/calendly` for Calendly
    /// - `/default` for everything else
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(customise: impl FnOnce(&mut ServiceConfig)) -> Self {
        let downstream = MockServer::start().await;
        let base = downstream.uri();

        let mut config = ServiceConfig {
            environment: Environment::Production,
            endpoints: EndpointConfig {
                default: SourceEndpoints {
                    production: Some(format!("{base}/default")),
                    non_production: None,
                    fallbacks: vec![],
                },
                slack: SourceEndpoints {
                    production: Some(format!("{base}/slack")),
                    non_production: None,
                    fallbacks: vec![format!("{base}/slack-backup")],
                },
                calendly: SourceEndpoints {
                    production: Some(format!("{base}/calendly")),
                    non_production: None,
                    fallbacks: vec![],
                },
                fallbacks: vec![],
            },
            forwarding: ForwardConfig {
                attempt_timeout_ms: 500,
                ingress_deadline_ms: 2000,
                ..ForwardConfig::default()
            },
            subscriptions: SubscriptionConfig {
                allowed_host_suffixes: vec!["127.0.0.1".to_string()],
                require_https: false,
                timeout_ms: 2000,
                allowed_topic_arns: vec![RELAY_TOPIC_ARN.to_string()],
            },
            verification: VerificationConfig::default(),
            ..ServiceConfig::default()
        };
        customise(&mut config);
        config.validate().expect("test configuration must be valid");

        let notifier = Arc::new(RecordingNotifier::default());
        let forwarder = HttpForwarder::new(&config.forwarding).expect("http client");
        let pipeline = IngressPipeline::new(
            Arc::new(IdempotencyCache::from_config(&config.dedup)),
            EndpointResolver::new(config.endpoints.clone()),
            Arc::new(forwarder),
            notifier.clone(),
            config.environment,
        )
        .with_verifiers(
            config
                .verification
                .build_verifiers()
                .expect("verifiers build"),
        )
        .with_notification_verifier(Arc::new(config.subscriptions.notification_verifier()))
        .with_forward_config(&config.forwarding);

        let confirmer = Arc::new(HttpSubscriptionConfirmer::new(config.subscriptions.clone()));
        let metrics = ServiceMetrics::new().expect("metrics registry");
        let state = AppState::new(config, Arc::new(pipeline), confirmer, metrics);

        Self {
            router: create_router(state.clone()),
            state,
            downstream,
            notifier,
        }
    }

    /// Mount a downstream route answering with `status`
    pub async fn mount(&self, route: &str, status: u16) {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.downstream)
            .await;
    }

    /// Requests the downstream server received on `route`
    pub async fn received_on(&self, route: &str) -> Vec<RecordedRequest> {
        self.downstream
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == route)
            .collect()
    }

    /// Send one request through the router
    pub async fn send(&self, request: Request<Body>) -> (u16, Value) {
        use tower::ServiceExt;

        let response: Response<Body> = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status().as_u16();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn post(&self, body: &Value) -> (u16, Value) {
        self.send(post_json(body, &[])).await
    }
}

// ============================================================================
// Request Builders
// ============================================================================

pub fn post_json(body: &Value, headers: &[(&str, &str)]) -> Request<Body> {
    post_raw(body.to_string(), "application/json", headers)
}

pub fn post_raw(body: String, content_type: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/ingest")
        .header("content-type", content_type);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body)).unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ============================================================================
// Payload Fixtures
// ============================================================================

pub fn slack_message(team: &str, channel: &str, ts: &str) -> Value {
    json!({
        "type": "event_callback",
        "team_id": team,
        "event_id": format!("Ev-{ts}"),
        "event": {"type": "message", "channel": channel, "ts": ts, "text": "hello"}
    })
}

pub fn calendly_invitee_created(invitee_uuid: &str, created_at: &str) -> Value {
    json!({
        "event": "invitee.created",
        "created_at": created_at,
        "payload": {
            "uri": format!("https://api.calendly.com/scheduled_events/EV1/invitees/{invitee_uuid}"),
            "email": "someone@example.com",
            "name": "Some One"
        }
    })
}

/// Pub/sub notification carrying a relay wrapper around `original`
pub fn pubsub_notification(source: &str, original: &Value, extra: Value) -> Value {
    let mut wrapper = json!({"original": original});
    if let (Some(w), Some(e)) = (wrapper.as_object_mut(), extra.as_object()) {
        for (k, v) in e {
            w.insert(k.clone(), v.clone());
        }
    }
    json!({
        "Type": "Notification",
        "MessageId": "msg-1",
        "TopicArn": RELAY_TOPIC_ARN,
        "Message": json!({"metadata": {"source": source}, "payload": wrapper}).to_string(),
        "Timestamp": "2024-01-01T00:00:00.000Z"
    })
}

/// Wait until the downstream server has seen `count` requests in total
pub async fn wait_for_requests(server: &MockServer, count: usize) {
    for _ in 0..100 {
        if server.received_requests().await.unwrap_or_default().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
