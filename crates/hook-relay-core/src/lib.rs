//! # Hook-Relay Core
//!
//! Core business logic for the Hook-Relay webhook ingestion and forwarding service.
//!
//! This crate contains the domain logic for accepting Slack and Calendly webhooks,
//! whether they arrive directly or wrapped in a pub/sub notification envelope,
//! classifying and deduplicating them, and forwarding each unique event to the
//! downstream endpoint configured for its source and the active environment.
//!
//! ## Architecture
//!
//! The pipeline stages are pure functions wherever possible:
//! - [`webhook::unwrap`] strips pub/sub envelopes
//! - [`webhook::classify`] scores the payload against known provider shapes
//! - [`webhook::identify`] derives the deduplication key
//!
//! Stateful and side-effecting concerns sit behind explicit types and traits:
//! [`dedup::IdempotencyCache`], [`endpoint::EndpointResolver`],
//! [`forwarder::EventForwarder`] and [`notifier::Notifier`]. The
//! [`pipeline::IngressPipeline`] composes them.
//!
//! ## Usage
//!
//! ```rust
//! use hook_relay_core::{Environment, Source};
//!
//! let env: Environment = "prod".parse().unwrap();
//! assert!(env.is_production());
//! assert_eq!(Source::Slack.as_str(), "slack");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use uuid::Uuid;

// ============================================================================
// Domain Types
// ============================================================================

/// Upstream provider an inbound webhook was attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Slack,
    Calendly,
    Unknown,
}

impl Source {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Calendly => "calendly",
            Self::Unknown => "unknown",
        }
    }

    /// Sources with a dedicated provider shape
    pub fn known() -> [Source; 2] {
        [Self::Slack, Self::Calendly]
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "slack" => Ok(Self::Slack),
            "calendly" => Ok(Self::Calendly),
            "unknown" => Ok(Self::Unknown),
            _ => Err(ParseError::InvalidFormat {
                expected: "slack, calendly, or unknown".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

/// Ordinal strength of a source classification
///
/// Variants are declared weakest first so that `Ord` compares by strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deduplication key for an inbound event
///
/// Always prefixed with the source name, e.g. `slack:T1:C1:1700000000.000100`
/// or `calendly:invitee.created:abc-def-123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventIdentity(String);

impl EventIdentity {
    /// Wrap an already formatted identity string
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Build an identity from a source prefix and `:`-joined parts
    pub fn from_parts(source: Source, parts: &[&str]) -> Self {
        let mut value = source.as_str().to_string();
        for part in parts {
            value.push(':');
            value.push_str(part);
        }
        Self(value)
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Time and Metadata Types
// ============================================================================

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Whole seconds since the Unix epoch
    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    /// Milliseconds since the Unix epoch
    pub fn unix_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> Duration {
        let chrono_duration = self.0.signed_duration_since(other.0);
        chrono_duration.to_std().unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Deployment environment enumeration
///
/// Endpoint resolution only distinguishes production from everything else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    #[serde(alias = "dev")]
    Development,
    #[serde(alias = "stage")]
    Staging,
    #[serde(alias = "prod")]
    Production,
}

impl Environment {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Whether production endpoints apply
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ParseError::InvalidFormat {
                expected: "development, staging, or production".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for response mapping and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Temporary failures that may succeed on a later delivery
    Transient,
    /// Permanent failures caused by the request itself
    Permanent,
    /// Security-related failures requiring immediate attention
    Security,
    /// Configuration errors preventing correct operation
    Configuration,
}

/// Error type for input validation failures
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' is out of range: {message}")]
    OutOfRange { field: String, message: String },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

// ============================================================================
// Module declarations
// ============================================================================

/// Inbound request model, envelope unwrapping, classification and identity
pub mod webhook;

/// Time-bounded idempotency cache
pub mod dedup;

/// Downstream endpoint configuration and resolution
pub mod endpoint;

/// Downstream delivery with ordered fallback
pub mod forwarder;

/// Operator notifications
pub mod notifier;

/// Provider signature verification for direct deliveries
pub mod signature;

/// End-to-end ingress pipeline
pub mod pipeline;

// Re-export key types for convenience
pub use dedup::{CacheError, DedupConfig, IdempotencyCache};
pub use endpoint::{EndpointConfig, EndpointResolver, EndpointTarget, ResolveError};
pub use forwarder::{
    EventForwarder, ForwardConfig, ForwardError, ForwardRequest, ForwardResult, HttpForwarder,
};
pub use notifier::{LogNotifier, NotificationConfig, Notifier, NotifyOptions, WebhookNotifier};
pub use pipeline::{ForwardStatus, IngressError, IngressOutcome, IngressPipeline, IngressStage};
pub use signature::{
    NotificationVerifier, SecretSource, SignatureError, SignatureVerifier, TopicAllowList,
    VerificationConfig,
};
pub use webhook::{
    Classification, Envelope, InboundHeaders, InboundMessage, NotificationFrame,
    SubscriptionRequest, WebhookError, WrapperKind,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
