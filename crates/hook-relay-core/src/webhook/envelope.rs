//! Pub/sub envelope detection and unwrapping.
//!
//! Provider webhooks may reach the relay directly or via a pub/sub topic. In
//! the latter case the HTTP body is a notification frame whose `Message` field
//! is a JSON string carrying a relay wrapper:
//!
//! ```json
//! {
//!   "metadata": { "source": "slack" },
//!   "payload": { "original": { ... }, "channel": "C123", "team_id": "T123" }
//! }
//! ```
//!
//! [`unwrap`] returns the provider payload found under `original` together with
//! the wrapper's sibling fields, which may carry context the provider payload
//! lacks. It never fails: anything unrecognised is treated as a direct payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How the inbound body was wrapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapperKind {
    /// Pub/sub notification carrying a relay wrapper
    Notification,
    /// Pub/sub subscription handshake
    SubscriptionConfirm,
    /// Direct provider delivery
    None,
}

/// Details of a subscription handshake frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    pub subscribe_url: String,
    pub topic_arn: String,
    pub message_id: Option<String>,
}

/// Delivery metadata from the outer pub/sub frame of a notification
///
/// These fields are copied as received. Nothing here is authenticated until a
/// [`NotificationVerifier`](crate::signature::NotificationVerifier) accepts it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotificationFrame {
    /// The frame's `Type`, normally `Notification`
    pub frame_type: Option<String>,
    pub topic_arn: Option<String>,
    pub message_id: Option<String>,
}

/// Result of unwrapping an inbound body
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub wrapper_kind: WrapperKind,
    pub inner_payload: Value,
    /// Wrapper siblings of `original` that the inner payload does not carry
    pub aux_fields: Map<String, Value>,
    /// Source named by the relay wrapper, if any
    pub source_tag: Option<String>,
    pub subscription: Option<SubscriptionRequest>,
    /// Outer frame metadata; present only for notifications
    pub frame: Option<NotificationFrame>,
}

impl Envelope {
    fn direct(body: &Value) -> Self {
        Self {
            wrapper_kind: WrapperKind::None,
            inner_payload: body.clone(),
            aux_fields: Map::new(),
            source_tag: None,
            subscription: None,
            frame: None,
        }
    }

    pub fn is_wrapped(&self) -> bool {
        self.wrapper_kind != WrapperKind::None
    }

    /// Inner payload with auxiliary fields added at the top level where absent
    pub fn reattached_payload(&self) -> Value {
        let mut payload = self.inner_payload.clone();
        if let Value::Object(map) = &mut payload {
            for (key, value) in &self.aux_fields {
                map.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        payload
    }
}

// ============================================================================
// Frame shapes
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct PubSubFrame {
    #[serde(rename = "Type", default)]
    frame_type: Option<Value>,
    #[serde(rename = "SubscribeURL", alias = "subscribeUrl", alias = "SubscribeUrl", default)]
    subscribe_url: Option<Value>,
    #[serde(rename = "TopicArn", alias = "topicArn", default)]
    topic_arn: Option<Value>,
    #[serde(rename = "Message", default)]
    message: Option<Value>,
    #[serde(rename = "MessageId", default)]
    message_id: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RelayMessage {
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    source: Option<Value>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    wrapper: Option<Value>,
}

impl RelayMessage {
    fn source_tag(&self) -> Option<String> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("source"))
            .and_then(Value::as_str)
            .or_else(|| self.source.as_ref().and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Wrapper object holding `original`, preferring `payload`
    fn wrapper_map(&self) -> Option<&Map<String, Value>> {
        [self.payload.as_ref(), self.wrapper.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(Value::as_object)
            .find(|map| map.contains_key("original"))
    }
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Unwrapping
// ============================================================================

/// Detect and strip a pub/sub envelope
pub fn unwrap(body: &Value) -> Envelope {
    let frame = match PubSubFrame::deserialize(body) {
        Ok(frame) => frame,
        Err(_) => return Envelope::direct(body),
    };

    if let (Some(subscribe_url), Some(topic_arn)) = (
        non_empty_string(frame.subscribe_url.as_ref()),
        non_empty_string(frame.topic_arn.as_ref()),
    ) {
        return Envelope {
            wrapper_kind: WrapperKind::SubscriptionConfirm,
            inner_payload: body.clone(),
            aux_fields: Map::new(),
            source_tag: None,
            subscription: Some(SubscriptionRequest {
                subscribe_url,
                topic_arn,
                message_id: non_empty_string(frame.message_id.as_ref()),
            }),
            frame: None,
        };
    }

    let Some(message) = frame.message.as_ref().and_then(Value::as_str) else {
        return Envelope::direct(body);
    };

    match unwrap_notification(message) {
        Some(mut envelope) => {
            envelope.frame = Some(NotificationFrame {
                frame_type: non_empty_string(frame.frame_type.as_ref()),
                topic_arn: non_empty_string(frame.topic_arn.as_ref()),
                message_id: non_empty_string(frame.message_id.as_ref()),
            });
            envelope
        }
        None => Envelope::direct(body),
    }
}

fn unwrap_notification(message: &str) -> Option<Envelope> {
    let parsed: Value = serde_json::from_str(message).ok()?;
    let relay = RelayMessage::deserialize(&parsed).ok()?;
    let source_tag = relay.source_tag()?;
    let wrapper = relay.wrapper_map()?;

    let inner_payload = match wrapper.get("original") {
        // Some publishers double-encode the original payload
        Some(Value::String(text)) => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
        }
        Some(value) => value.clone(),
        None => return None,
    };

    let aux_fields = wrapper
        .iter()
        .filter(|(key, _)| key.as_str() != "original")
        .filter(|(key, _)| {
            inner_payload
                .as_object()
                .map(|inner| !inner.contains_key(key.as_str()))
                .unwrap_or(true)
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Some(Envelope {
        wrapper_kind: WrapperKind::Notification,
        inner_payload,
        aux_fields,
        source_tag: Some(source_tag),
        subscription: None,
        frame: None,
    })
}

/// Challenge token when `payload` is a provider URL-verification request
pub fn verification_challenge(payload: &Value) -> Option<&str> {
    let object = payload.as_object()?;
    if object.get("type").and_then(Value::as_str) != Some("url_verification") {
        return None;
    }
    object.get("challenge").and_then(Value::as_str)
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
