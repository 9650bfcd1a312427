//! # Event Forwarding
//!
//! Delivers an accepted event to its downstream endpoint, walking the
//! [`EndpointTarget`] fallback chain until one URL answers with a 2xx status.
//!
//! Forwarding never fails the caller: the outcome is reported as a
//! [`ForwardResult`] which the ingress pipeline logs and, on failure, sends to
//! the notification side-channel.

use crate::endpoint::EndpointTarget;
use crate::webhook::payload::{channel_id, SlackPayload};
use crate::webhook::InboundHeaders;
use crate::{EventIdentity, Source, ValidationError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// User agent sent by Slack's own delivery client
pub const SLACK_DELIVERY_USER_AGENT: &str = "Slackbot 1.0 (+https://api.slack.com/robots)";

/// Channel placeholder for Slack events that carry none
pub const MISSING_CHANNEL_SENTINEL: &str = "unknown-channel";

pub const EVENT_ID_HEADER: &str = "x-relay-event-id";
pub const TRACKING_ID_HEADER: &str = "x-relay-tracking-id";
pub const SOURCE_HEADER: &str = "x-relay-source";

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for downstream forwarding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Timeout for each individual attempt
    pub attempt_timeout_ms: u64,
    /// Time the ingress handler waits for the fallback chain before answering
    pub ingress_deadline_ms: u64,
    /// User agent used when the inbound request carried none
    pub user_agent: String,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 1500,
            ingress_deadline_ms: 2500,
            user_agent: format!("hook-relay/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ForwardConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.attempt_timeout_ms == 0 {
            return Err(ValidationError::OutOfRange {
                field: "forwarding.attempt_timeout_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.ingress_deadline_ms == 0 {
            return Err(ValidationError::OutOfRange {
                field: "forwarding.ingress_deadline_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.attempt_timeout_ms > self.ingress_deadline_ms {
            return Err(ValidationError::OutOfRange {
                field: "forwarding.attempt_timeout_ms".to_string(),
                message: format!(
                    "{} ms exceeds the ingress deadline of {} ms",
                    self.attempt_timeout_ms, self.ingress_deadline_ms
                ),
            });
        }
        if self.user_agent.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "forwarding.user_agent".to_string(),
            });
        }
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn ingress_deadline(&self) -> Duration {
        Duration::from_millis(self.ingress_deadline_ms)
    }
}

// ============================================================================
// Request and Result Types
// ============================================================================

/// Fully prepared outbound delivery
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardRequest {
    pub identity: EventIdentity,
    pub source: Source,
    pub payload: Value,
    pub content_type: String,
    pub user_agent: String,
}

impl ForwardRequest {
    /// Reconstruct outbound headers and enrich the payload
    ///
    /// Slack message events always go out with Slack's own user agent so that
    /// downstream consumers see the same value whether the event arrived
    /// directly or through pub/sub.
    pub fn build(
        identity: EventIdentity,
        source: Source,
        payload: Value,
        aux_fields: &Map<String, Value>,
        inbound_headers: &InboundHeaders,
        default_user_agent: &str,
    ) -> Self {
        let payload = enrich_payload(source, payload, aux_fields);

        let content_type = inbound_headers
            .get("content-type")
            .filter(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or("application/json")
            .to_string();

        let user_agent = if source == Source::Slack
            && SlackPayload::from_value(&payload).is_message_event()
        {
            SLACK_DELIVERY_USER_AGENT.to_string()
        } else {
            inbound_headers
                .get("user-agent")
                .filter(|ua| !ua.trim().is_empty())
                .unwrap_or(default_user_agent)
                .to_string()
        };

        Self {
            identity,
            source,
            payload,
            content_type,
            user_agent,
        }
    }
}

/// Reattach auxiliary fields and guarantee a Slack event channel
pub fn enrich_payload(source: Source, mut payload: Value, aux_fields: &Map<String, Value>) -> Value {
    if let Value::Object(map) = &mut payload {
        for (key, value) in aux_fields {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        if source == Source::Slack {
            backfill_slack_channel(map, aux_fields);
        }
    }
    payload
}

fn backfill_slack_channel(map: &mut Map<String, Value>, aux_fields: &Map<String, Value>) {
    let fallback = aux_fields
        .get("channel")
        .and_then(channel_id)
        .or_else(|| map.get("channel").and_then(channel_id))
        .or_else(|| map.get("channel_id").and_then(channel_id))
        .unwrap_or(MISSING_CHANNEL_SENTINEL)
        .to_string();

    if let Some(Value::Object(event)) = map.get_mut("event") {
        let has_channel = event.get("channel").map(|c| !c.is_null()).unwrap_or(false);
        if !has_channel {
            event.insert("channel".to_string(), Value::String(fallback));
        }
    }
}

/// Outcome of a forward attempt chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub used_url: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub attempts: u32,
}

/// Errors for a single forward attempt
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to serialize payload for {url}: {message}")]
    Serialization { url: String, message: String },

    #[error("HTTP client could not be created: {message}")]
    Client { message: String },
}

impl ForwardError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// ============================================================================
// Fallback Chain
// ============================================================================

/// Try each URL in order until one attempt succeeds
///
/// `attempt` receives the URL and the 1-based attempt number and yields the
/// response status on success.
pub async fn try_endpoints_in_order<I, F, Fut>(urls: I, mut attempt: F) -> ForwardResult
where
    I: IntoIterator<Item = String>,
    F: FnMut(String, u32) -> Fut,
    Fut: Future<Output = Result<u16, ForwardError>>,
{
    let started = Instant::now();
    let mut attempts = 0u32;
    let mut last_error: Option<ForwardError> = None;

    for url in urls {
        attempts += 1;
        match attempt(url.clone(), attempts).await {
            Ok(status) => {
                if attempts > 1 {
                    info!(url = %url, attempt = attempts, "Delivered via fallback endpoint");
                }
                return ForwardResult {
                    success: true,
                    status_code: Some(status),
                    used_url: Some(url),
                    error: None,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    attempts,
                };
            }
            Err(e) => {
                warn!(url = %url, attempt = attempts, error = %e, "Forward attempt failed");
                last_error = Some(e);
            }
        }
    }

    ForwardResult {
        success: false,
        status_code: last_error.as_ref().and_then(ForwardError::status_code),
        used_url: None,
        error: Some(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no endpoints to try".to_string()),
        ),
        elapsed_ms: started.elapsed().as_millis() as u64,
        attempts,
    }
}

// ============================================================================
// Forwarder Trait and HTTP Implementation
// ============================================================================

/// Interface for downstream delivery
#[async_trait]
pub trait EventForwarder: Send + Sync {
    /// Deliver `request`, trying the primary URL then each fallback
    async fn forward(&self, target: &EndpointTarget, request: &ForwardRequest) -> ForwardResult;
}

/// reqwest-backed forwarder
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    attempt_timeout: Duration,
}

impl HttpForwarder {
    pub fn new(config: &ForwardConfig) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ForwardError::Client {
                message: e.to_string(),
            })?;
        Ok(Self::with_client(client, config.attempt_timeout()))
    }

    pub fn with_client(client: reqwest::Client, attempt_timeout: Duration) -> Self {
        Self {
            client,
            attempt_timeout,
        }
    }

    async fn send_once(
        &self,
        url: String,
        request: &ForwardRequest,
        attempt: u32,
    ) -> Result<u16, ForwardError> {
        let body = serde_json::to_vec(&request.payload).map_err(|e| ForwardError::Serialization {
            url: url.clone(),
            message: e.to_string(),
        })?;
        let tracking_id = uuid::Uuid::new_v4().to_string();

        debug!(
            url = %url,
            attempt,
            identity = %request.identity,
            tracking_id = %tracking_id,
            "Forwarding event"
        );

        let response = self
            .client
            .post(&url)
            .timeout(self.attempt_timeout)
            .header(reqwest::header::CONTENT_TYPE, &request.content_type)
            .header(reqwest::header::USER_AGENT, &request.user_agent)
            .header(EVENT_ID_HEADER, request.identity.as_str())
            .header(TRACKING_ID_HEADER, &tracking_id)
            .header(SOURCE_HEADER, request.source.as_str())
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ForwardError::Timeout {
                        url: url.clone(),
                        timeout_ms: self.attempt_timeout.as_millis() as u64,
                    }
                } else {
                    ForwardError::Connection {
                        url: url.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForwardError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(status.as_u16())
    }
}

#[async_trait]
impl EventForwarder for HttpForwarder {
    async fn forward(&self, target: &EndpointTarget, request: &ForwardRequest) -> ForwardResult {
        let urls: Vec<String> = target.urls().map(str::to_string).collect();
        try_endpoints_in_order(urls, |url, attempt| self.send_once(url, request, attempt)).await
    }
}

#[cfg(test)]
#[path = "forwarder_tests.rs"]
mod tests;
