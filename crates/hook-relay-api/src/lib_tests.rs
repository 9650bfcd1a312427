//! Tests for the HTTP layer: routing, response mapping and middleware.

use super::*;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use hook_relay_core::endpoint::SourceEndpoints;
use hook_relay_core::{
    EndpointConfig, EndpointResolver, EndpointTarget, Environment, EventForwarder,
    ForwardRequest, ForwardResult, IdempotencyCache, LogNotifier, SubscriptionRequest,
};
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use tower::ServiceExt;

// ============================================================================
// Test doubles
// ============================================================================

/// Forwarder that records requests and always succeeds
#[derive(Default)]
struct StubForwarder {
    requests: Mutex<Vec<ForwardRequest>>,
}

impl StubForwarder {
    fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl EventForwarder for StubForwarder {
    async fn forward(&self, target: &EndpointTarget, request: &ForwardRequest) -> ForwardResult {
        self.requests.lock().unwrap().push(request.clone());
        ForwardResult {
            success: true,
            status_code: Some(200),
            used_url: Some(target.primary_url.clone()),
            error: None,
            elapsed_ms: 1,
            attempts: 1,
        }
    }
}

/// Confirmer that records topics and succeeds or fails on demand
struct StubConfirmer {
    fail: bool,
    topics: Mutex<Vec<String>>,
}

impl StubConfirmer {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            topics: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl SubscriptionConfirmer for StubConfirmer {
    async fn confirm(&self, request: &SubscriptionRequest) -> Result<(), SubscriptionError> {
        self.topics.lock().unwrap().push(request.topic_arn.clone());
        if self.fail {
            Err(SubscriptionError::Rejected { status: 403 })
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Test helpers
// ============================================================================

fn test_config() -> ServiceConfig {
    ServiceConfig {
        environment: Environment::Staging,
        endpoints: EndpointConfig {
            default: SourceEndpoints {
                production: None,
                non_production: Some("https://auto-test.example.com/default".to_string()),
                fallbacks: vec![],
            },
            slack: SourceEndpoints {
                production: None,
                non_production: Some("https://auto-test.example.com/slack".to_string()),
                fallbacks: vec![],
            },
            ..EndpointConfig::default()
        },
        ..ServiceConfig::default()
    }
}

fn test_app(
    config: ServiceConfig,
    forwarder: Arc<StubForwarder>,
    confirmer: Arc<StubConfirmer>,
) -> (Router, AppState) {
    let pipeline = IngressPipeline::new(
        Arc::new(IdempotencyCache::new(Duration::from_secs(1800), 1000)),
        EndpointResolver::new(config.endpoints.clone()),
        forwarder,
        Arc::new(LogNotifier),
        config.environment,
    );
    let metrics = ServiceMetrics::new().expect("metrics registry");
    let state = AppState::new(config, Arc::new(pipeline), confirmer, metrics);
    (create_router(state.clone()), state)
}

fn post_json(path: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn slack_event() -> Value {
    json!({
        "type": "event_callback",
        "team_id": "T1",
        "event": {"type": "message", "channel": "C1", "ts": "1700000000.000100"}
    })
}

// ============================================================================
// Ingest endpoint
// ============================================================================

mod ingest_tests {
    use super::*;

    #[tokio::test]
    async fn test_challenge_is_echoed_verbatim() {
        let forwarder = Arc::new(StubForwarder::default());
        let (app, _) = test_app(test_config(), forwarder.clone(), StubConfirmer::new(false));

        let response = app
            .oneshot(post_json(
                "/ingest",
                &json!({"type": "url_verification", "challenge": "abc123"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"challenge": "abc123"}));
        assert_eq!(forwarder.count(), 0);
    }

    #[tokio::test]
    async fn test_redelivery_is_marked_duplicate() {
        let forwarder = Arc::new(StubForwarder::default());
        let (app, _) = test_app(test_config(), forwarder.clone(), StubConfirmer::new(false));

        let first = app
            .clone()
            .oneshot(post_json("/ingest", &slack_event()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let first = body_json(first).await;
        assert_eq!(first["success"], true);
        assert_eq!(first["source"], "slack");
        assert_eq!(first["forwarded"], "delivered");
        assert!(first.get("duplicate").is_none());

        let second = app
            .oneshot(post_json("/ingest", &slack_event()))
            .await
            .unwrap();
        let second = body_json(second).await;
        assert_eq!(second["duplicate"], true);
        assert_eq!(second["id"], first["id"]);
        assert!(second.get("forwarded").is_none());

        assert_eq!(forwarder.count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let (app, _) = test_app(
            test_config(),
            Arc::new(StubForwarder::default()),
            StubConfirmer::new(false),
        );

        let request = Request::builder()
            .method("POST")
            .uri("/ingest")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["status"], 400);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let mut config = test_config();
        config.webhooks.max_body_size = 64;
        let (app, _) = test_app(
            config,
            Arc::new(StubForwarder::default()),
            StubConfirmer::new(false),
        );

        let big = json!({"type": "event_callback", "padding": "x".repeat(512)});
        let response = app.oneshot(post_json("/ingest", &big)).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_custom_ingest_path_is_routed() {
        let mut config = test_config();
        config.webhooks.endpoint_path = "/hooks/in".to_string();
        let (app, _) = test_app(
            config,
            Arc::new(StubForwarder::default()),
            StubConfirmer::new(false),
        );

        let response = app
            .clone()
            .oneshot(post_json("/hooks/in", &slack_event()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(post_json("/ingest", &slack_event()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

// ============================================================================
// Subscription handshake
// ============================================================================

mod subscription_handshake_tests {
    use super::*;

    fn handshake() -> Value {
        json!({
            "Type": "SubscriptionConfirmation",
            "TopicArn": "arn:aws:sns:us-east-1:123:relay",
            "SubscribeURL": "https://sns.us-east-1.amazonaws.com/?Action=ConfirmSubscription",
            "MessageId": "m-1"
        })
    }

    #[tokio::test]
    async fn test_handshake_is_confirmed() {
        let confirmer = StubConfirmer::new(false);
        let forwarder = Arc::new(StubForwarder::default());
        let (app, _) = test_app(test_config(), forwarder.clone(), confirmer.clone());

        let response = app.oneshot(post_json("/ingest", &handshake())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"success": true, "subscribed": true, "topic": "arn:aws:sns:us-east-1:123:relay"})
        );
        assert_eq!(confirmer.topics.lock().unwrap().len(), 1);
        assert_eq!(forwarder.count(), 0);
    }

    #[tokio::test]
    async fn test_failed_confirmation_is_bad_gateway() {
        let (app, _) = test_app(
            test_config(),
            Arc::new(StubForwarder::default()),
            StubConfirmer::new(true),
        );

        let response = app.oneshot(post_json("/ingest", &handshake())).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}

// ============================================================================
// Operational endpoints and middleware
// ============================================================================

mod operational_tests {
    use super::*;

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_version() {
        let (app, _) = test_app(
            test_config(),
            Arc::new(StubForwarder::default()),
            StubConfirmer::new(false),
        );

        let response = app.oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_readiness_requires_default_endpoint() {
        let (ready_app, _) = test_app(
            test_config(),
            Arc::new(StubForwarder::default()),
            StubConfirmer::new(false),
        );
        let response = ready_app.oneshot(get("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (unready_app, _) = test_app(
            ServiceConfig::default(),
            Arc::new(StubForwarder::default()),
            StubConfirmer::new(false),
        );
        let response = unready_app.oneshot(get("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_status_reports_cache_and_routing() {
        let (app, _) = test_app(
            test_config(),
            Arc::new(StubForwarder::default()),
            StubConfirmer::new(false),
        );
        app.clone()
            .oneshot(post_json("/ingest", &slack_event()))
            .await
            .unwrap();

        let response = app.oneshot(get("/status")).await.unwrap();
        let body = body_json(response).await;

        assert_eq!(body["environment"], "staging");
        assert_eq!(body["ingest_path"], "/ingest");
        assert_eq!(body["dedup"]["entries"], 1);
        assert_eq!(body["dedup"]["ttl_seconds"], 1800);
        assert_eq!(body["routed_sources"], json!(["slack"]));
        assert_eq!(body["verified_sources"], json!([]));
    }

    #[tokio::test]
    async fn test_metrics_expose_ingress_counters() {
        let (app, _) = test_app(
            test_config(),
            Arc::new(StubForwarder::default()),
            StubConfirmer::new(false),
        );
        app.clone()
            .oneshot(post_json("/ingest", &slack_event()))
            .await
            .unwrap();

        let response = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(text.contains("hook_relay_ingress_requests_total{outcome=\"delivered\"} 1"));
        assert!(text.contains("hook_relay_classifications_total{source=\"slack\"} 1"));
        assert!(text.contains("hook_relay_dedup_cache_entries 1"));
    }

    #[tokio::test]
    async fn test_correlation_id_is_echoed_or_generated() {
        let (app, _) = test_app(
            test_config(),
            Arc::new(StubForwarder::default()),
            StubConfirmer::new(false),
        );

        let request = Request::builder()
            .uri("/health")
            .header(CORRELATION_ID_HEADER, "corr-42")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.headers()[CORRELATION_ID_HEADER], "corr-42");

        let response = app.oneshot(get("/health")).await.unwrap();
        let generated = response.headers()[CORRELATION_ID_HEADER].to_str().unwrap();
        assert!(uuid::Uuid::parse_str(generated).is_ok());
    }
}
