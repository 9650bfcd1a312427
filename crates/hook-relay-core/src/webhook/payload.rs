//! Lenient typed views over provider payloads.
//!
//! Every field is optional and a field of the wrong JSON type reads as absent,
//! so a Calendly body decodes into an empty [`SlackPayload`] (and vice versa)
//! instead of failing. Decoding never errors.

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Channel id from either a bare string or an `{ "id": ... }` object
pub fn channel_id(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.as_str()),
        Value::Object(map) => map
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

/// Render a scalar JSON value as an identity component
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============================================================================
// Slack
// ============================================================================

/// Slack Events API or interactivity payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackPayload {
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub challenge: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub team_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub team: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub event_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub event_time: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub event: Option<SlackEvent>,
    #[serde(default, deserialize_with = "lenient")]
    pub channel: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub trigger_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub action_ts: Option<String>,
}

impl SlackPayload {
    /// Decode a view; never fails
    pub fn from_value(value: &Value) -> Self {
        Self::deserialize(value).unwrap_or_default()
    }

    /// Team id from `team_id`, `team.id`/`team` or `event.team`
    pub fn team(&self) -> Option<&str> {
        self.team_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.team.as_ref().and_then(channel_id))
            .or_else(|| self.event.as_ref().and_then(|e| e.team.as_deref()))
    }

    /// Channel id from the event, falling back to the top-level channel
    pub fn channel(&self) -> Option<&str> {
        self.event
            .as_ref()
            .and_then(|e| e.channel.as_ref())
            .and_then(channel_id)
            .or_else(|| self.channel.as_ref().and_then(channel_id))
    }

    /// Whether the inner event is a channel message
    pub fn is_message_event(&self) -> bool {
        self.event
            .as_ref()
            .and_then(|e| e.kind.as_deref())
            .map(|k| k == "message")
            .unwrap_or(false)
    }

    pub fn event_time_text(&self) -> Option<String> {
        self.event_time.as_ref().and_then(scalar_text)
    }
}

/// Inner `event` object of a Slack event callback
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub subtype: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub channel: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub team: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub ts: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub event_ts: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<SlackMessageRef>,
    #[serde(default, deserialize_with = "lenient")]
    pub previous_message: Option<SlackMessageRef>,
}

impl SlackEvent {
    /// Timestamp of the original message, so that edits collapse onto it
    ///
    /// Edit notifications (`message_changed`) carry the original under
    /// `message.ts`, or `previous_message.ts` when that is absent.
    pub fn message_ts(&self) -> Option<&str> {
        if self.subtype.as_deref() == Some("message_changed") {
            let original = self
                .message
                .as_ref()
                .and_then(|m| m.ts.as_deref())
                .or_else(|| self.previous_message.as_ref().and_then(|m| m.ts.as_deref()));
            if let Some(ts) = original.filter(|s| !s.is_empty()) {
                return Some(ts);
            }
        }
        self.ts
            .as_deref()
            .or(self.event_ts.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Nested message reference on edit/delete events
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackMessageRef {
    #[serde(default, deserialize_with = "lenient")]
    pub ts: Option<String>,
}

// ============================================================================
// Calendly
// ============================================================================

/// Calendly webhook body (`event` name plus `payload` object)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalendlyPayload {
    #[serde(default, deserialize_with = "lenient")]
    pub event: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub payload: Option<CalendlyInner>,
}

impl CalendlyPayload {
    /// Decode a view; never fails
    pub fn from_value(value: &Value) -> Self {
        Self::deserialize(value).unwrap_or_default()
    }

    pub fn event_type_kind(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.event_type.as_ref())
            .and_then(|t| t.kind.as_deref())
    }

    /// Most specific resource URI: invitee, then event type, then scheduled event
    pub fn resource_uri(&self) -> Option<&str> {
        let inner = self.payload.as_ref()?;
        inner
            .uri
            .as_deref()
            .or_else(|| inner.invitee.as_ref().and_then(|i| i.uri.as_deref()))
            .or_else(|| inner.event_type.as_ref().and_then(|t| t.uri.as_deref()))
            .or_else(|| inner.scheduled_event.as_ref().and_then(|s| s.uri.as_deref()))
            .filter(|s| !s.is_empty())
    }

    /// Explicit identifier when no URI is present
    pub fn explicit_id(&self) -> Option<String> {
        let inner = self.payload.as_ref();
        inner
            .and_then(|p| p.invitee.as_ref())
            .and_then(|i| i.uuid.clone())
            .or_else(|| inner.and_then(|p| p.uuid.clone()))
            .or_else(|| inner.and_then(|p| p.id.as_ref()).and_then(scalar_text))
            .or_else(|| self.id.as_ref().and_then(scalar_text))
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalendlyInner {
    #[serde(default, deserialize_with = "lenient")]
    pub uri: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub uuid: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub event_type: Option<CalendlyResource>,
    #[serde(default, deserialize_with = "lenient")]
    pub invitee: Option<CalendlyResource>,
    #[serde(default, deserialize_with = "lenient")]
    pub scheduled_event: Option<CalendlyResource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalendlyResource {
    #[serde(default, deserialize_with = "lenient")]
    pub uri: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub uuid: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub kind: Option<String>,
}
