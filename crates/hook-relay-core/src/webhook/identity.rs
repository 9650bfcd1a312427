//! Deduplication identity derivation.
//!
//! Identities are computed from payload content so that provider retries of
//! the same logical event collide. Only the last-resort fallbacks (a Slack
//! message with neither timestamp nor event id, a Calendly event with no URI
//! and no id) involve the clock or randomness.

use super::payload::{CalendlyPayload, SlackPayload};
use crate::{EventIdentity, Source, Timestamp};
use serde_json::Value;
use sha2::{Digest, Sha256};

const MISSING_TEAM: &str = "no-team";
const MISSING_CHANNEL: &str = "no-channel";

/// Derive the deduplication key for a classified payload
pub fn identify(source: Source, payload: &Value) -> EventIdentity {
    match source {
        Source::Slack => identify_slack(&SlackPayload::from_value(payload)),
        Source::Calendly => identify_calendly(&CalendlyPayload::from_value(payload)),
        Source::Unknown => identify_unknown(payload),
    }
}

fn identify_slack(payload: &SlackPayload) -> EventIdentity {
    let team = payload.team().unwrap_or(MISSING_TEAM);
    let channel = payload.channel().unwrap_or(MISSING_CHANNEL);

    if payload.is_message_event() {
        if let Some(ts) = payload.event.as_ref().and_then(|e| e.message_ts()) {
            return EventIdentity::from_parts(Source::Slack, &[team, channel, ts]);
        }
        if let Some(event_id) = payload.event_id.as_deref().filter(|s| !s.is_empty()) {
            return EventIdentity::from_parts(Source::Slack, &["event", event_id]);
        }
        return EventIdentity::from_parts(Source::Slack, &[team, channel, &random_suffix()]);
    }

    if let Some(event_id) = payload.event_id.as_deref().filter(|s| !s.is_empty()) {
        return EventIdentity::from_parts(Source::Slack, &["event", event_id]);
    }
    if let Some(trigger_id) = payload.trigger_id.as_deref().filter(|s| !s.is_empty()) {
        return EventIdentity::from_parts(Source::Slack, &["trigger", trigger_id]);
    }

    let ts = payload
        .event
        .as_ref()
        .and_then(|e| e.message_ts().map(str::to_string))
        .or_else(|| payload.action_ts.clone())
        .or_else(|| payload.event_time_text())
        .unwrap_or_else(|| Timestamp::now().unix_seconds().to_string());

    EventIdentity::from_parts(Source::Slack, &[team, channel, &ts])
}

fn identify_calendly(payload: &CalendlyPayload) -> EventIdentity {
    let event = payload
        .event
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or("event");

    if let Some(segment) = payload.resource_uri().and_then(trailing_segment) {
        return EventIdentity::from_parts(Source::Calendly, &[event, segment]);
    }
    if let Some(id) = payload.explicit_id() {
        return EventIdentity::from_parts(Source::Calendly, &[event, &id]);
    }

    let placeholder = format!("ts-{}", Timestamp::now().unix_millis());
    EventIdentity::from_parts(Source::Calendly, &[event, &placeholder])
}

fn identify_unknown(payload: &Value) -> EventIdentity {
    let mut canonical = String::new();
    write_canonical(payload, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    let hex = hex::encode(digest);
    EventIdentity::from_parts(Source::Unknown, &[&hex[..32]])
}

/// Last non-empty path segment of a URI, ignoring query and fragment
pub fn trailing_segment(uri: &str) -> Option<&str> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    path.split('/').rev().find(|segment| !segment.is_empty())
}

/// Time-boxed random suffix for payloads with no stable key
fn random_suffix() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Timestamp::now().unix_seconds(), &id[..8])
}

/// JSON rendering with object keys sorted, independent of map ordering
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
