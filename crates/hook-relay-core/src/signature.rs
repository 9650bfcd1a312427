//! # Provider Signature Verification
//!
//! HMAC-SHA256 verification for deliveries that arrive directly from a
//! provider, plus the trust check for pub/sub notification frames.
//!
//! A payload relayed through pub/sub skips the provider check only when a
//! [`NotificationVerifier`] accepts its outer frame. Any other wrapped payload
//! is held to the same provider signature rules as a direct delivery.
//!
//! | Provider | Header | Signed content |
//! |----------|--------|----------------|
//! | Slack | `X-Slack-Signature: v0=<hex>` + `X-Slack-Request-Timestamp` | `v0:{timestamp}:{body}` |
//! | Calendly | `Calendly-Webhook-Signature: t=<ts>,v1=<hex>` | `{t}.{body}` |
//!
//! Both verifiers reject timestamps outside the configured tolerance window
//! and compare digests in constant time via [`Mac::verify_slice`].

use crate::webhook::classifier::{
    CALENDLY_SIGNATURE_HEADER, SLACK_SIGNATURE_HEADER, SLACK_TIMESTAMP_HEADER,
};
use crate::webhook::{InboundHeaders, NotificationFrame};
use crate::{Source, ValidationError};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TOLERANCE_SECONDS: u64 = 300;

/// `Type` of a pub/sub frame carrying a published message
pub const NOTIFICATION_FRAME_TYPE: &str = "Notification";

// ============================================================================
// Secrets and Configuration
// ============================================================================

/// Where a signing secret comes from
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecretSource {
    /// Inline secret. Development only.
    Literal { value: String },
    /// Read from an environment variable at startup
    Env { name: String },
}

impl fmt::Debug for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal { .. } => f
                .debug_struct("Literal")
                .field("value", &"<REDACTED>")
                .finish(),
            Self::Env { name } => f.debug_struct("Env").field("name", name).finish(),
        }
    }
}

impl SecretSource {
    /// Resolve the secret value
    pub fn resolve(&self) -> Result<String, SignatureError> {
        let value = match self {
            Self::Literal { value } => {
                warn!("Literal signing secret in configuration; use an env secret in production");
                value.clone()
            }
            Self::Env { name } => std::env::var(name).map_err(|_| SignatureError::Secret {
                message: format!("environment variable '{name}' is not set"),
            })?,
        };
        if value.is_empty() {
            return Err(SignatureError::Secret {
                message: "signing secret is empty".to_string(),
            });
        }
        Ok(value)
    }

    pub fn validate(&self, field: &str) -> Result<(), ValidationError> {
        let empty = match self {
            Self::Literal { value } => value.is_empty(),
            Self::Env { name } => name.trim().is_empty(),
        };
        if empty {
            return Err(ValidationError::Required {
                field: field.to_string(),
            });
        }
        Ok(())
    }
}

/// Signing secret and replay window for one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSecretConfig {
    pub secret: SecretSource,
    #[serde(default = "default_tolerance_seconds")]
    pub tolerance_seconds: u64,
}

fn default_tolerance_seconds() -> u64 {
    DEFAULT_TOLERANCE_SECONDS
}

/// Signature verification configuration; a provider without an entry is not verified
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub slack: Option<ProviderSecretConfig>,
    pub calendly: Option<ProviderSecretConfig>,
}

impl VerificationConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(slack) = &self.slack {
            slack.secret.validate("verification.slack.secret")?;
        }
        if let Some(calendly) = &self.calendly {
            calendly.secret.validate("verification.calendly.secret")?;
        }
        Ok(())
    }

    /// Resolve secrets and build the configured verifiers
    pub fn build_verifiers(&self) -> Result<VerifierSet, SignatureError> {
        let mut set = VerifierSet::default();
        if let Some(slack) = &self.slack {
            set.register(Arc::new(SlackSignatureVerifier::new(
                slack.secret.resolve()?,
                Duration::from_secs(slack.tolerance_seconds),
            )));
        }
        if let Some(calendly) = &self.calendly {
            set.register(Arc::new(CalendlySignatureVerifier::new(
                calendly.secret.resolve()?,
                Duration::from_secs(calendly.tolerance_seconds),
            )));
        }
        Ok(set)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised during signature verification
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("Missing signature header '{header}'")]
    MissingHeader { header: String },

    #[error("Malformed signature header '{header}': {message}")]
    MalformedHeader { header: String, message: String },

    #[error("Request timestamp is {age_seconds}s away from now, outside the replay window")]
    StaleTimestamp { age_seconds: i64 },

    #[error("Signature does not match payload")]
    Mismatch,

    #[error("Signing secret unavailable: {message}")]
    Secret { message: String },

    #[error("Pub/sub notification is not trusted: {reason}")]
    UntrustedNotification { reason: String },
}

// ============================================================================
// Verifier Trait
// ============================================================================

/// Interface for provider signature checks
pub trait SignatureVerifier: Send + Sync {
    fn source(&self) -> Source;

    /// Verify against the current wall clock
    fn verify(&self, headers: &InboundHeaders, raw_body: &[u8]) -> Result<(), SignatureError> {
        self.verify_at(headers, raw_body, chrono::Utc::now().timestamp())
    }

    /// Verify as if the current time were `now_unix`
    fn verify_at(
        &self,
        headers: &InboundHeaders,
        raw_body: &[u8],
        now_unix: i64,
    ) -> Result<(), SignatureError>;
}

/// Registered verifiers keyed by provider
#[derive(Clone, Default)]
pub struct VerifierSet {
    verifiers: HashMap<Source, Arc<dyn SignatureVerifier>>,
}

impl fmt::Debug for VerifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifierSet")
            .field("sources", &self.verifiers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl VerifierSet {
    pub fn register(&mut self, verifier: Arc<dyn SignatureVerifier>) {
        self.verifiers.insert(verifier.source(), verifier);
    }

    pub fn get(&self, source: Source) -> Option<&Arc<dyn SignatureVerifier>> {
        self.verifiers.get(&source)
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }
}

// ============================================================================
// Notification Frames
// ============================================================================

/// Interface for deciding whether a pub/sub notification frame is trusted
pub trait NotificationVerifier: Send + Sync {
    fn verify(&self, frame: &NotificationFrame) -> Result<(), SignatureError>;
}

/// Trusts `Notification` frames published to one of a fixed set of topics
///
/// An empty allow-list trusts nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicAllowList {
    topics: Vec<String>,
}

impl TopicAllowList {
    pub fn new<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: topics
                .into_iter()
                .map(Into::into)
                .filter(|topic: &String| !topic.trim().is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl NotificationVerifier for TopicAllowList {
    fn verify(&self, frame: &NotificationFrame) -> Result<(), SignatureError> {
        if frame.frame_type.as_deref() != Some(NOTIFICATION_FRAME_TYPE) {
            return Err(SignatureError::UntrustedNotification {
                reason: format!("frame type is not '{NOTIFICATION_FRAME_TYPE}'"),
            });
        }
        let topic = frame
            .topic_arn
            .as_deref()
            .ok_or_else(|| SignatureError::UntrustedNotification {
                reason: "frame has no TopicArn".to_string(),
            })?;
        if !self.topics.iter().any(|allowed| allowed == topic) {
            return Err(SignatureError::UntrustedNotification {
                reason: format!("topic '{topic}' is not allowed"),
            });
        }
        Ok(())
    }
}

fn required<'a>(headers: &'a InboundHeaders, name: &str) -> Result<&'a str, SignatureError> {
    headers
        .get(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SignatureError::MissingHeader {
            header: name.to_string(),
        })
}

fn parse_timestamp(header: &str, value: &str) -> Result<i64, SignatureError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| SignatureError::MalformedHeader {
            header: header.to_string(),
            message: "timestamp is not an integer".to_string(),
        })
}

fn check_window(timestamp: i64, now_unix: i64, tolerance: Duration) -> Result<(), SignatureError> {
    let age = now_unix - timestamp;
    if age.unsigned_abs() > tolerance.as_secs() {
        return Err(SignatureError::StaleTimestamp { age_seconds: age });
    }
    Ok(())
}

fn verify_hex_mac(secret: &str, parts: &[&[u8]], signature_hex: &str) -> Result<(), SignatureError> {
    let expected = hex::decode(signature_hex).map_err(|_| SignatureError::Mismatch)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Secret {
        message: "secret cannot be used as HMAC key".to_string(),
    })?;
    for part in parts {
        mac.update(part);
    }
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

fn hex_mac(secret: &str, parts: &[&[u8]]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    for part in parts {
        mac.update(part);
    }
    hex::encode(mac.finalize().into_bytes())
}

// ============================================================================
// Slack
// ============================================================================

/// Slack v0 request signing
pub struct SlackSignatureVerifier {
    signing_secret: String,
    tolerance: Duration,
}

impl SlackSignatureVerifier {
    pub fn new(signing_secret: String, tolerance: Duration) -> Self {
        Self {
            signing_secret,
            tolerance,
        }
    }

    /// `v0=<hex>` signature for a timestamp and body
    pub fn sign(&self, timestamp: i64, body: &[u8]) -> String {
        let base = format!("v0:{timestamp}:");
        format!(
            "v0={}",
            hex_mac(&self.signing_secret, &[base.as_bytes(), body])
        )
    }
}

impl fmt::Debug for SlackSignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackSignatureVerifier")
            .field("signing_secret", &"<REDACTED>")
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl SignatureVerifier for SlackSignatureVerifier {
    fn source(&self) -> Source {
        Source::Slack
    }

    fn verify_at(
        &self,
        headers: &InboundHeaders,
        raw_body: &[u8],
        now_unix: i64,
    ) -> Result<(), SignatureError> {
        let signature = required(headers, SLACK_SIGNATURE_HEADER)?;
        let timestamp_raw = required(headers, SLACK_TIMESTAMP_HEADER)?;
        let timestamp = parse_timestamp(SLACK_TIMESTAMP_HEADER, timestamp_raw)?;
        check_window(timestamp, now_unix, self.tolerance)?;

        let hex_part = signature
            .strip_prefix("v0=")
            .ok_or_else(|| SignatureError::MalformedHeader {
                header: SLACK_SIGNATURE_HEADER.to_string(),
                message: "expected 'v0=' prefix".to_string(),
            })?;

        let base = format!("v0:{timestamp_raw}:");
        verify_hex_mac(&self.signing_secret, &[base.as_bytes(), raw_body], hex_part)
    }
}

// ============================================================================
// Calendly
// ============================================================================

/// Calendly webhook signing (`t=...,v1=...`)
pub struct CalendlySignatureVerifier {
    signing_key: String,
    tolerance: Duration,
}

impl CalendlySignatureVerifier {
    pub fn new(signing_key: String, tolerance: Duration) -> Self {
        Self {
            signing_key,
            tolerance,
        }
    }

    /// Full header value for a timestamp and body
    pub fn sign(&self, timestamp: i64, body: &[u8]) -> String {
        let prefix = format!("{timestamp}.");
        format!(
            "t={timestamp},v1={}",
            hex_mac(&self.signing_key, &[prefix.as_bytes(), body])
        )
    }
}

impl fmt::Debug for CalendlySignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalendlySignatureVerifier")
            .field("signing_key", &"<REDACTED>")
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl SignatureVerifier for CalendlySignatureVerifier {
    fn source(&self) -> Source {
        Source::Calendly
    }

    fn verify_at(
        &self,
        headers: &InboundHeaders,
        raw_body: &[u8],
        now_unix: i64,
    ) -> Result<(), SignatureError> {
        let header = required(headers, CALENDLY_SIGNATURE_HEADER)?;

        let mut timestamp_raw = None;
        let mut signature = None;
        for pair in header.split(',') {
            match pair.trim().split_once('=') {
                Some(("t", value)) => timestamp_raw = Some(value.trim()),
                Some(("v1", value)) => signature = Some(value.trim()),
                _ => {}
            }
        }

        let malformed = |message: &str| SignatureError::MalformedHeader {
            header: CALENDLY_SIGNATURE_HEADER.to_string(),
            message: message.to_string(),
        };
        let timestamp_raw = timestamp_raw.ok_or_else(|| malformed("missing 't' component"))?;
        let signature = signature.ok_or_else(|| malformed("missing 'v1' component"))?;

        let timestamp = parse_timestamp(CALENDLY_SIGNATURE_HEADER, timestamp_raw)?;
        check_window(timestamp, now_unix, self.tolerance)?;

        let prefix = format!("{timestamp_raw}.");
        verify_hex_mac(&self.signing_key, &[prefix.as_bytes(), raw_body], signature)
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
