//! # Hook-Relay HTTP Service
//!
//! HTTP surface for the Hook-Relay ingestion pipeline.
//!
//! This library provides:
//! - The ingest endpoint accepting Slack, Calendly and pub/sub deliveries
//! - Health, readiness and status endpoints
//! - Prometheus metrics
//! - Service configuration loading and validation

pub mod config;
pub mod errors;
pub mod metrics;
pub mod responses;
pub mod subscription;

pub use config::{LoggingConfig, ServerConfig, ServiceConfig, WebhookConfig};
pub use errors::{ConfigError, IngressHandlerError, ServiceError};
pub use metrics::ServiceMetrics;
pub use responses::{
    ChallengeResponse, DedupStatus, HealthResponse, IngestResponse, ReadinessResponse,
    StatusResponse, SubscriptionResponse,
};
pub use subscription::{
    HttpSubscriptionConfirmer, SubscriptionConfig, SubscriptionConfirmer, SubscriptionError,
};

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use hook_relay_core::{
    InboundHeaders, InboundMessage, IngressOutcome, IngressPipeline, Source, Timestamp,
};
use std::{future::IntoFuture, sync::Arc, time::Instant};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{error, info, instrument, warn};

/// Header carrying the request correlation ID
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub pipeline: Arc<IngressPipeline>,
    pub confirmer: Arc<dyn SubscriptionConfirmer>,
    pub metrics: Arc<ServiceMetrics>,
    pub started_at: Timestamp,
}

impl AppState {
    pub fn new(
        config: ServiceConfig,
        pipeline: Arc<IngressPipeline>,
        confirmer: Arc<dyn SubscriptionConfirmer>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            pipeline,
            confirmer,
            metrics,
            started_at: Timestamp::now(),
        }
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let ingest_routes = Router::new()
        .route(&state.config.webhooks.endpoint_path, post(handle_ingest))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(
            state.config.webhooks.max_body_size,
        ));

    let health_routes = Router::new()
        .route("/health", get(handle_health_check))
        .route("/ready", get(handle_readiness_check))
        .route("/status", get(handle_status));

    let observability_routes = Router::new().route("/metrics", get(metrics_endpoint));

    let mut router = Router::new()
        .merge(ingest_routes)
        .merge(health_routes)
        .merge(observability_routes)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http());

    if state.config.server.enable_compression {
        router = router.layer(CompressionLayer::new());
    }
    if state.config.server.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router.with_state(state)
}

/// Start HTTP server and run until a shutdown signal arrives
pub async fn start_server(
    config: ServiceConfig,
    pipeline: Arc<IngressPipeline>,
    confirmer: Arc<dyn SubscriptionConfirmer>,
) -> Result<(), ServiceError> {
    let metrics = ServiceMetrics::new().map_err(|e| {
        ServiceError::Configuration(ConfigError::Invalid {
            message: format!("Failed to initialize metrics: {}", e),
        })
    })?;

    let address = format!("{}:{}", config.server.host, config.server.port);
    let shutdown_timeout = config.server.shutdown_timeout();

    let state = AppState::new(config, pipeline, confirmer, metrics);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: address.clone(),
            message: e.to_string(),
        })?;

    info!(address = %address, "Starting HTTP server");

    // In-flight requests get `shutdown_timeout` to finish once a signal arrives
    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        })
        .into_future();

    let drain_deadline = async move {
        if signalled_rx.await.is_ok() {
            tokio::time::sleep(shutdown_timeout).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = server => {
            result.map_err(|e| ServiceError::ServerFailed {
                message: e.to_string(),
            })?;
        }
        _ = drain_deadline => {
            warn!(
                timeout_seconds = shutdown_timeout.as_secs(),
                "Graceful shutdown timed out; abandoning in-flight requests"
            );
        }
    }

    info!("HTTP server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
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
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

// ============================================================================
// Ingest Handler
// ============================================================================

/// Handle a provider or pub/sub delivery
///
/// Answers verification challenges and subscription handshakes directly.
/// Everything else goes through the ingestion pipeline, which bounds the
/// time spent waiting on downstream endpoints; the caller gets `200` whether
/// or not the forward succeeded.
#[instrument(skip(state, headers, body), fields(body_size = body.len()))]
pub async fn handle_ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, IngressHandlerError> {
    let started = Instant::now();
    let message = InboundMessage::new(inbound_headers(&headers), body);

    let result = state.pipeline.ingest(message).await;
    state.metrics.set_cache_entries(state.pipeline.cache().len());

    let outcome = match result {
        Ok(outcome) => {
            state.metrics.record_outcome(&outcome, started.elapsed());
            outcome
        }
        Err(e) => {
            state.metrics.record_error(&e, started.elapsed());
            return Err(e.into());
        }
    };

    let response = match outcome {
        IngressOutcome::ChallengeEcho { challenge } => {
            Json(ChallengeResponse { challenge }).into_response()
        }
        IngressOutcome::SubscriptionConfirmation(request) => {
            state.confirmer.confirm(&request).await?;
            Json(SubscriptionResponse {
                success: true,
                subscribed: true,
                topic: request.topic_arn,
            })
            .into_response()
        }
        IngressOutcome::Duplicate {
            identity,
            classification,
        } => Json(IngestResponse::duplicate(identity, classification.source)).into_response(),
        IngressOutcome::Accepted {
            identity,
            classification,
            forward,
            ..
        } => Json(IngestResponse::accepted(
            identity,
            classification.source,
            &forward,
        ))
        .into_response(),
    };

    Ok(response)
}

/// Copy request headers, replacing invalid UTF-8 rather than dropping the header
fn inbound_headers(headers: &HeaderMap) -> InboundHeaders {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

// ============================================================================
// Health Check Handlers
// ============================================================================

/// Liveness check
async fn handle_health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Timestamp::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check for orchestrators
///
/// Ready once unknown-source events have somewhere to go.
#[instrument(skip(state))]
async fn handle_readiness_check(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, StatusCode> {
    let ready = state
        .config
        .endpoints
        .default
        .url_for(state.config.environment)
        .is_some();

    let response = ReadinessResponse {
        ready,
        timestamp: Timestamp::now(),
    };

    if ready {
        Ok(Json(response))
    } else {
        warn!("Readiness check failed: no default endpoint for environment");
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let config = &state.config;
    let environment = config.environment;

    let routed_sources = Source::known()
        .into_iter()
        .filter(|source| {
            config
                .endpoints
                .for_source(*source)
                .and_then(|section| section.url_for(environment))
                .is_some()
        })
        .collect();

    let mut verified_sources = Vec::new();
    if config.verification.slack.is_some() {
        verified_sources.push(Source::Slack);
    }
    if config.verification.calendly.is_some() {
        verified_sources.push(Source::Calendly);
    }

    let cache = state.pipeline.cache();
    Json(StatusResponse {
        service: "hook-relay".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment,
        uptime_seconds: Timestamp::now().duration_since(state.started_at).as_secs(),
        ingest_path: config.webhooks.endpoint_path.clone(),
        dedup: DedupStatus {
            entries: cache.len(),
            ttl_seconds: cache.ttl().as_secs(),
        },
        routed_sources,
        verified_sources,
    })
}

// ============================================================================
// Observability Handlers
// ============================================================================

/// Prometheus metrics endpoint
#[instrument(skip_all)]
async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.metrics.set_cache_entries(state.pipeline.cache().len());
    state.metrics.encode().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware with correlation ID tracking
///
/// Reuses the caller's `x-correlation-id` when present, otherwise generates
/// one, and echoes it on the response.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert(CORRELATION_ID_HEADER, header_value);
    }

    let status = response.status();
    if status.is_server_error() {
        error!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed successfully"
        );
    }

    response
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
