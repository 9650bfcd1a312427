//! # Hook-Relay Service
//!
//! Binary entry point for the Hook-Relay HTTP service.
//!
//! This executable:
//! - Loads and validates configuration from files and environment
//! - Initializes logging
//! - Wires the ingestion pipeline and its collaborators
//! - Runs the periodic dedup sweeper alongside the HTTP server

use anyhow::Context;
use hook_relay_api::{start_server, HttpSubscriptionConfirmer, ServiceConfig, ServiceError};
use hook_relay_core::{EndpointResolver, HttpForwarder, IdempotencyCache, IngressPipeline};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    // Configuration is read before logging starts so the log format can come from it
    let service_config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            init_logging(&ServiceConfig::default());
            error!(error = %format!("{e:#}"), "Service configuration is invalid; aborting");
            std::process::exit(3);
        }
    };
    init_logging(&service_config);

    info!(
        environment = %service_config.environment,
        ingest_path = %service_config.webhooks.endpoint_path,
        "Starting Hook-Relay Service"
    );

    let pipeline = match build_pipeline(&service_config) {
        Ok(pipeline) => Arc::new(pipeline),
        Err(e) => {
            error!(error = %format!("{e:#}"), "Failed to build ingestion pipeline; aborting");
            std::process::exit(3);
        }
    };

    let sweeper = pipeline
        .cache()
        .spawn_sweeper(service_config.dedup.sweep_interval());

    let confirmer = Arc::new(HttpSubscriptionConfirmer::new(
        service_config.subscriptions.clone(),
    ));

    info!(
        host = %service_config.server.host,
        port = service_config.server.port,
        "Starting HTTP server"
    );

    let result = start_server(service_config, pipeline, confirmer).await;
    sweeper.abort();

    if let Err(e) = result {
        error!("Server terminated: {}", e);

        let exit_code = match e {
            ServiceError::BindFailed { .. } => 1,
            ServiceError::ServerFailed { .. } => 2,
            ServiceError::Configuration(_) => 3,
        };

        std::process::exit(exit_code);
    }
}

// ============================================================================
// Private helpers
// ============================================================================

/// Load configuration from files and `HOOK_RELAY__*` variables, then validate it
fn load_config() -> anyhow::Result<ServiceConfig> {
    let config = ServiceConfig::load().context("could not load service configuration")?;
    config
        .validate()
        .context("service configuration failed validation")?;
    Ok(config)
}

/// `RUST_LOG` wins over `logging.level`
fn init_logging(config: &ServiceConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_pipeline(config: &ServiceConfig) -> anyhow::Result<IngressPipeline> {
    let cache = Arc::new(IdempotencyCache::from_config(&config.dedup));
    let resolver = EndpointResolver::new(config.endpoints.clone());
    let forwarder =
        HttpForwarder::new(&config.forwarding).context("could not create HTTP client")?;
    let verifiers = config
        .verification
        .build_verifiers()
        .context("could not resolve signing secrets")?;
    if verifiers.is_empty() {
        info!("No signing secrets configured; direct deliveries are not signature-checked");
    }
    let trusted_topics = config.subscriptions.notification_verifier();
    if trusted_topics.is_empty() && !verifiers.is_empty() {
        info!("No trusted pub/sub topics configured; wrapped deliveries must carry provider signatures");
    }

    Ok(IngressPipeline::new(
        cache,
        resolver,
        Arc::new(forwarder),
        config.notifications.build_notifier(),
        config.environment,
    )
    .with_verifiers(verifiers)
    .with_notification_verifier(Arc::new(trusted_topics))
    .with_forward_config(&config.forwarding))
}
