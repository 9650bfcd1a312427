//! Pub/sub subscription confirmation
//!
//! A topic subscription is activated by fetching the `SubscribeURL` from the
//! handshake frame. The URL comes from an unauthenticated request body, so it
//! is only fetched over an allowed scheme and from an allowed host.
//!
//! The same section lists the topics whose notifications are trusted without
//! a provider signature; see [`SubscriptionConfig::notification_verifier`].

use async_trait::async_trait;
use hook_relay_core::{SubscriptionRequest, TopicAllowList, ValidationError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument, warn};
use url::Url;

/// Subscription confirmation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Hosts equal to, or ending in, one of these suffixes may be fetched
    pub allowed_host_suffixes: Vec<String>,
    pub require_https: bool,
    pub timeout_ms: u64,
    /// Topics whose `Notification` frames are trusted; empty trusts none
    pub allowed_topic_arns: Vec<String>,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            allowed_host_suffixes: vec![".amazonaws.com".to_string()],
            require_https: true,
            timeout_ms: 5000,
            allowed_topic_arns: Vec::new(),
        }
    }
}

impl SubscriptionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_ms == 0 {
            return Err(ValidationError::OutOfRange {
                field: "subscriptions.timeout_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self
            .allowed_host_suffixes
            .iter()
            .any(|s| s.trim_start_matches('.').trim().is_empty())
        {
            return Err(ValidationError::InvalidFormat {
                field: "subscriptions.allowed_host_suffixes".to_string(),
                message: "suffixes must not be empty".to_string(),
            });
        }
        if let Some(topic) = self
            .allowed_topic_arns
            .iter()
            .find(|topic| !topic.trim().starts_with("arn:"))
        {
            return Err(ValidationError::InvalidFormat {
                field: "subscriptions.allowed_topic_arns".to_string(),
                message: format!("'{topic}' is not a topic ARN"),
            });
        }
        Ok(())
    }

    /// Trust check for wrapped deliveries, built from `allowed_topic_arns`
    pub fn notification_verifier(&self) -> TopicAllowList {
        TopicAllowList::new(self.allowed_topic_arns.iter().map(|topic| topic.trim()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn host_allowed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.allowed_host_suffixes.iter().any(|suffix| {
            let bare = suffix.trim().trim_start_matches('.').to_ascii_lowercase();
            host == bare || host.ends_with(&format!(".{bare}"))
        })
    }
}

/// Errors raised while confirming a subscription
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("Subscribe URL '{url}' is invalid: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Subscribe URL host '{host}' is not in the allow-list")]
    HostNotAllowed { host: String },

    #[error("Subscribe request failed: {message}")]
    Request { message: String },

    #[error("Subscribe request rejected with status {status}")]
    Rejected { status: u16 },
}

/// Interface for activating a pub/sub subscription
#[async_trait]
pub trait SubscriptionConfirmer: Send + Sync {
    async fn confirm(&self, request: &SubscriptionRequest) -> Result<(), SubscriptionError>;
}

/// Confirms subscriptions with an HTTP `GET` of the subscribe URL
#[derive(Debug, Clone)]
pub struct HttpSubscriptionConfirmer {
    client: reqwest::Client,
    config: SubscriptionConfig,
}

impl HttpSubscriptionConfirmer {
    pub fn new(config: SubscriptionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Parse `raw` and check it against the scheme and host allow-list
    pub fn check_url(&self, raw: &str) -> Result<Url, SubscriptionError> {
        let url = Url::parse(raw.trim()).map_err(|e| SubscriptionError::InvalidUrl {
            url: raw.to_string(),
            message: e.to_string(),
        })?;

        match url.scheme() {
            "https" => {}
            "http" if !self.config.require_https => {}
            other => {
                return Err(SubscriptionError::InvalidUrl {
                    url: raw.to_string(),
                    message: format!("scheme '{other}' is not allowed"),
                })
            }
        }

        let host = url.host_str().ok_or_else(|| SubscriptionError::InvalidUrl {
            url: raw.to_string(),
            message: "missing host".to_string(),
        })?;
        if !self.config.host_allowed(host) {
            return Err(SubscriptionError::HostNotAllowed {
                host: host.to_string(),
            });
        }

        Ok(url)
    }
}

#[async_trait]
impl SubscriptionConfirmer for HttpSubscriptionConfirmer {
    #[instrument(skip(self, request), fields(topic = %request.topic_arn))]
    async fn confirm(&self, request: &SubscriptionRequest) -> Result<(), SubscriptionError> {
        let url = self.check_url(&request.subscribe_url).map_err(|e| {
            warn!(error = %e, "Refusing to fetch subscribe URL");
            e
        })?;

        let response = self
            .client
            .get(url)
            .timeout(self.config.timeout())
            .send()
            .await
            .map_err(|e| SubscriptionError::Request {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SubscriptionError::Rejected {
                status: status.as_u16(),
            });
        }

        info!("Subscription confirmed");
        Ok(())
    }
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;
