//! # Operator Notifications
//!
//! Side-channel for reporting forwarding problems. Notifications are
//! fire-and-forget: [`Notifier::notify`] is synchronous and must return
//! without waiting on I/O.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Options attached to a notification
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotifyOptions {
    pub is_error: bool,
    pub data: Option<Value>,
}

impl NotifyOptions {
    pub fn error(data: Value) -> Self {
        Self {
            is_error: true,
            data: Some(data),
        }
    }

    pub fn info(data: Value) -> Self {
        Self {
            is_error: false,
            data: Some(data),
        }
    }
}

/// Interface for the notification side-channel
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, options: NotifyOptions);
}

/// Notifier that only writes to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, options: NotifyOptions) {
        let data = options.data.unwrap_or(Value::Null);
        if options.is_error {
            error!(notification = message, data = %data, "Relay notification");
        } else {
            info!(notification = message, data = %data, "Relay notification");
        }
    }
}

/// Notifier posting JSON to an operator webhook
///
/// Each notification is sent from a spawned task; delivery failures are
/// logged and dropped.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }

    fn body(message: &str, options: &NotifyOptions) -> Value {
        json!({
            "message": message,
            "isError": options.is_error,
            "data": options.data,
            "timestamp": Timestamp::now().to_rfc3339(),
            "service": "hook-relay",
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, message: &str, options: NotifyOptions) {
        // Always keep a local record
        LogNotifier.notify(message, options.clone());

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime available; notification not sent to webhook");
                return;
            }
        };

        let request = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&Self::body(message, &options));
        let url = self.url.clone();

        handle.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(url = %url, "Notification delivered");
                }
                Ok(response) => {
                    warn!(url = %url, status = %response.status(), "Notification webhook rejected message");
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Notification webhook unreachable");
                }
            }
        });
    }
}

/// Configuration for the notification side-channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Operator webhook; log-only when unset
    pub webhook_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_ms: 5000,
        }
    }
}

impl NotificationConfig {
    pub fn build_notifier(&self) -> Arc<dyn Notifier> {
        match self.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => Arc::new(WebhookNotifier::new(
                url,
                Duration::from_millis(self.timeout_ms),
            )),
            None => Arc::new(LogNotifier),
        }
    }
}

#[cfg(test)]
#[path = "notifier_tests.rs"]
mod tests;
