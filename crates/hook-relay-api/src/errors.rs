//! Error types for the HTTP service

use crate::subscription::SubscriptionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use hook_relay_core::{IngressError, ValidationError};
use tracing::{error, warn};

/// Ingest handler errors with HTTP status code mapping
///
/// Callers are providers and the pub/sub system. They only ever see success,
/// a rejection of their input, or a server fault:
///
/// - `400 Bad Request`: the body could not be decoded
/// - `401 Unauthorized`: a provider signature did not verify
/// - `500 Internal Server Error`: cache, routing or task failures for this request
/// - `502 Bad Gateway`: the pub/sub subscription URL could not be confirmed
///
/// Downstream forwarding failures are never reported here; the pipeline
/// surfaces them through the notifier instead.
///
/// Internal details are logged server-side and replaced by a generic message
/// in the response body.
#[derive(Debug, thiserror::Error)]
pub enum IngressHandlerError {
    /// Ingress pipeline failure
    ///
    /// Maps to:
    /// - `400 Bad Request` for `IngressError::Malformed` (permanent, do not retry)
    /// - `401 Unauthorized` for `IngressError::Unauthorized`, including wrapped
    ///   payloads from an untrusted topic that carry no provider signature
    /// - `500 Internal Server Error` for everything else
    ///
    /// The response body for a 401 never names the failing check.
    #[error(transparent)]
    Ingress(#[from] IngressError),

    /// Pub/sub subscription URL could not be confirmed
    ///
    /// Maps to: `502 Bad Gateway` (the pub/sub system retries the handshake)
    ///
    /// Common causes:
    /// - `SubscribeURL` host outside the allowed suffixes
    /// - Plain HTTP while HTTPS is required
    /// - The confirmation GET failed or timed out
    #[error("Subscription confirmation failed: {0}")]
    Subscription(#[from] SubscriptionError),
}

impl IngressHandlerError {
    /// HTTP status returned to the caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Ingress(IngressError::Malformed(_)) => StatusCode::BAD_REQUEST,
            Self::Ingress(IngressError::Unauthorized { .. }) => StatusCode::UNAUTHORIZED,
            Self::Ingress(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Subscription(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for IngressHandlerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Ingress(IngressError::Malformed(e)) => {
                warn!(error = %e, "Rejected malformed request body");
                self.to_string()
            }
            Self::Ingress(IngressError::Unauthorized { provider, error }) => {
                warn!(provider = %provider, error = %error, "Rejected unsigned or mis-signed request");
                "Signature verification failed".to_string()
            }
            Self::Ingress(e) => {
                error!(error = %e, category = ?e.error_category(), "Internal error while handling ingest request");
                "Internal server error occurred. Please try again later.".to_string()
            }
            Self::Subscription(e) => {
                error!(error = %e, "Subscription confirmation failed");
                self.to_string()
            }
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        (status, Json(body)).into_response()
    }
}

/// Service-level errors
///
/// Raised while starting or running the HTTP server. The service binary maps
/// each variant to a distinct process exit code.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The listener could not be bound
    ///
    /// Exit code: `1`. Usually the port is taken or the address is invalid.
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    /// The server loop returned an error after starting
    ///
    /// Exit code: `2`.
    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    /// Configuration rejected before the server started
    ///
    /// Exit code: `3`.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A setting that cannot be expressed as a field-level validation failure
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    /// A field failed validation
    ///
    /// Covers missing endpoints, unparseable URLs, and `allowed_topic_arns`
    /// entries that are not ARNs.
    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    /// Sources could not be read or deserialized
    ///
    /// Raised by the `config` crate for unreadable files or mistyped
    /// `HOOK_RELAY__*` environment overrides.
    #[error("Configuration loading failed: {0}")]
    Loading(#[from] config::ConfigError),
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
