//! # Webhook Intake Module
//!
//! Raw inbound request model shared by every pipeline stage, plus the pure
//! stages that operate on it:
//!
//! - [`envelope`] strips pub/sub notification wrappers
//! - [`classifier`] attributes a payload to a provider
//! - [`identity`] derives the deduplication key
//!
//! Bodies are decoded once, at construction, into an [`InboundBody`]. JSON is
//! accepted regardless of the declared content type; form-encoded interactive
//! payloads carrying a `payload=<json>` field are unpacked to that JSON.

use crate::{ErrorCategory, Timestamp};
use bytes::Bytes;
use serde_json::{Map, Value};

pub mod classifier;
pub mod envelope;
pub mod identity;
pub mod payload;

pub use classifier::{classify, Classification};
pub use envelope::{
    unwrap, verification_challenge, Envelope, NotificationFrame, SubscriptionRequest, WrapperKind,
};
pub use identity::identify;

// ============================================================================
// Core Types
// ============================================================================

/// Ordered request headers with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundHeaders {
    entries: Vec<(String, String)>,
}

impl InboundHeaders {
    /// Create an empty header list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any earlier value with the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for InboundHeaders
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Decoded request body
#[derive(Debug, Clone, PartialEq)]
pub enum InboundBody {
    /// JSON document, possibly recovered from a form `payload` field
    Structured(Value),
    /// Anything that could not be decoded as structured data
    Opaque(String),
}

/// Raw HTTP request data from an upstream provider or pub/sub relay
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub headers: InboundHeaders,
    pub body: InboundBody,
    /// Exact bytes received; signature checks run over these
    pub raw_body: Bytes,
    pub received_at: Timestamp,
}

impl InboundMessage {
    /// Create a message, decoding the body eagerly
    pub fn new(headers: InboundHeaders, raw_body: Bytes) -> Self {
        let body = decode_body(headers.get("content-type"), &raw_body);
        Self {
            headers,
            body,
            raw_body,
            received_at: Timestamp::now(),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get("user-agent")
    }

    /// Structured body, or `MalformedPayload` when the body could not be decoded
    pub fn structured(&self) -> Result<&Value, WebhookError> {
        match &self.body {
            InboundBody::Structured(value) => Ok(value),
            InboundBody::Opaque(text) if text.trim().is_empty() => Err(WebhookError::EmptyBody),
            InboundBody::Opaque(_) => Err(WebhookError::MalformedPayload {
                message: format!(
                    "body is neither JSON nor a form-encoded payload (content-type: {})",
                    self.content_type().unwrap_or("none")
                ),
            }),
        }
    }
}

fn decode_body(content_type: Option<&str>, raw: &[u8]) -> InboundBody {
    if let Ok(value) = serde_json::from_slice::<Value>(raw) {
        return InboundBody::Structured(value);
    }

    let is_form = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("application/x-www-form-urlencoded"))
        .unwrap_or(false);

    if is_form {
        let mut fields = Map::new();
        for (key, value) in url::form_urlencoded::parse(raw) {
            if key == "payload" {
                if let Ok(inner) = serde_json::from_str::<Value>(&value) {
                    return InboundBody::Structured(inner);
                }
            }
            fields.insert(key.into_owned(), Value::String(value.into_owned()));
        }
        if !fields.is_empty() {
            return InboundBody::Structured(Value::Object(fields));
        }
    }

    InboundBody::Opaque(String::from_utf8_lossy(raw).into_owned())
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while decoding an inbound request
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Malformed payload: {message}")]
    MalformedPayload { message: String },

    #[error("Request body is empty")]
    EmptyBody,
}

impl WebhookError {
    /// Get error category for monitoring
    pub fn error_category(&self) -> ErrorCategory {
        ErrorCategory::Permanent
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
