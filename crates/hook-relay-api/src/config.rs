//! Configuration types for the HTTP service
//!
//! Every section carries serde defaults, so an absent file or an empty
//! environment still produces a complete [`ServiceConfig`]. Whether that
//! configuration is *usable* is decided by [`ServiceConfig::validate`]; the
//! built-in defaults deliberately leave the downstream endpoints unset.

use crate::errors::ConfigError;
use crate::subscription::SubscriptionConfig;
use hook_relay_core::{
    DedupConfig, EndpointConfig, Environment, ForwardConfig, NotificationConfig, ValidationError,
    VerificationConfig,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable naming an operator-supplied configuration file
pub const CONFIG_FILE_ENV: &str = "HOOK_RELAY_CONFIG_FILE";

/// Prefix for configuration overrides, e.g. `HOOK_RELAY__SERVER__PORT=9090`
pub const ENV_PREFIX: &str = "HOOK_RELAY";

const SYSTEM_CONFIG_FILE: &str = "/etc/hook-relay/service";
const LOCAL_CONFIG_FILE: &str = "config/service";

/// Paths served by the operational routes; the ingest path may not shadow them
const RESERVED_PATHS: &[&str] = &["/health", "/ready", "/status", "/metrics"];

/// Service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Ingest endpoint settings
    pub webhooks: WebhookConfig,

    /// Selects production or non-production downstream URLs
    pub environment: Environment,

    /// Downstream automation endpoints
    pub endpoints: EndpointConfig,

    /// Idempotency cache settings
    pub dedup: DedupConfig,

    /// Forwarding timeouts and defaults
    pub forwarding: ForwardConfig,

    /// Provider signing secrets
    pub verification: VerificationConfig,

    /// Pub/sub subscription confirmation
    pub subscriptions: SubscriptionConfig,

    /// Operator notification side-channel
    pub notifications: NotificationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load configuration from the standard sources
    ///
    /// Sources are applied in order, later ones overriding earlier ones:
    ///  1. `/etc/hook-relay/service.yaml` (optional)
    ///  2. `./config/service.yaml` (optional)
    ///  3. the file named by `HOOK_RELAY_CONFIG_FILE` (required when set)
    ///  4. environment variables prefixed `HOOK_RELAY__`
    ///
    /// The result is not validated.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var(CONFIG_FILE_ENV)
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(explicit.as_deref())
    }

    /// Same as [`ServiceConfig::load`] with an explicit file instead of the environment variable
    pub fn load_from(explicit_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name(SYSTEM_CONFIG_FILE)
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name(LOCAL_CONFIG_FILE)
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        if let Some(path) = explicit_path {
            builder = builder.add_source(
                config::File::with_name(path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Check the configuration is complete and internally consistent
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.webhooks.validate()?;
        self.endpoints.validate(self.environment)?;
        self.dedup.validate()?;
        self.forwarding.validate()?;
        self.verification.validate()?;
        self.subscriptions.validate()?;

        if let Some(url) = self
            .notifications
            .webhook_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
        {
            url::Url::parse(url.trim()).map_err(|e| ValidationError::InvalidFormat {
                field: "notifications.webhook_url".to_string(),
                message: e.to_string(),
            })?;
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Time allowed for in-flight requests after a shutdown signal
    pub shutdown_timeout_seconds: u64,

    /// Enable CORS
    pub enable_cors: bool,

    /// Enable compression
    pub enable_compression: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            enable_cors: false,
            enable_compression: true,
        }
    }
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

/// Ingest endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Path accepting provider and pub/sub deliveries
    pub endpoint_path: String,

    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            endpoint_path: "/ingest".to_string(),
            max_body_size: 1024 * 1024, // 1MiB
        }
    }
}

impl WebhookConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let path = self.endpoint_path.trim();
        if path.is_empty() {
            return Err(ValidationError::Required {
                field: "webhooks.endpoint_path".to_string(),
            });
        }
        if !path.starts_with('/') {
            return Err(ValidationError::InvalidFormat {
                field: "webhooks.endpoint_path".to_string(),
                message: format!("'{path}' must start with '/'"),
            });
        }
        if RESERVED_PATHS.contains(&path) {
            return Err(ValidationError::InvalidFormat {
                field: "webhooks.endpoint_path".to_string(),
                message: format!("'{path}' is reserved for an operational endpoint"),
            });
        }
        if self.max_body_size == 0 {
            return Err(ValidationError::OutOfRange {
                field: "webhooks.max_body_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directives used when `RUST_LOG` is unset
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "hook_relay_service=info,hook_relay_api=info,hook_relay_core=info,tower_http=debug"
                .to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
