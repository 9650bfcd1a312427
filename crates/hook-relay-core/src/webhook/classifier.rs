//! Source classification by indicator scoring.
//!
//! Each candidate provider has a fixed set of boolean indicators drawn from
//! headers and payload shape. The indicators that fire determine whether the
//! payload is attributed to that provider and with what [`Confidence`].
//! Payloads that no provider claims are classified as [`Source::Unknown`].

use super::payload::{CalendlyPayload, SlackPayload};
use super::InboundHeaders;
use crate::{Confidence, Source};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const SLACK_SIGNATURE_HEADER: &str = "x-slack-signature";
pub const SLACK_TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const CALENDLY_SIGNATURE_HEADER: &str = "calendly-webhook-signature";

const SLACK_USER_AGENT: &str = "slackbot";
const CALENDLY_USER_AGENT: &str = "calendly";

const SLACK_CALLBACK_TYPES: &[&str] = &["event_callback", "url_verification"];
const SLACK_MESSAGE_EVENT_TYPES: &[&str] = &["message", "app_mention"];

/// Calendly webhook lifecycle event names
pub const CALENDLY_LIFECYCLE_EVENTS: &[&str] = &[
    "invitee.created",
    "invitee.canceled",
    "invitee_no_show.created",
    "invitee_no_show.deleted",
    "routing_form_submission.created",
];

/// Outcome of [`classify`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub source: Source,
    pub confidence: Confidence,
    /// Every evaluated indicator, keyed `{source}.{name}`
    pub indicators: BTreeMap<String, bool>,
    pub details: BTreeMap<String, Value>,
}

impl Classification {
    pub fn is_known(&self) -> bool {
        self.source != Source::Unknown
    }

    /// Number of indicators that fired for `source`
    pub fn matched(&self, source: Source) -> usize {
        let prefix = format!("{}.", source.as_str());
        self.indicators
            .iter()
            .filter(|(name, fired)| **fired && name.starts_with(&prefix))
            .count()
    }
}

#[derive(Debug, Clone)]
struct Score {
    source: Source,
    matched: usize,
    confidence: Confidence,
    indicators: Vec<(&'static str, bool)>,
}

fn user_agent_contains(headers: &InboundHeaders, needle: &str) -> bool {
    headers
        .get("user-agent")
        .map(|ua| ua.to_ascii_lowercase().contains(needle))
        .unwrap_or(false)
}

fn score_slack(payload: &SlackPayload, headers: &InboundHeaders) -> Score {
    let signature = headers.contains(SLACK_SIGNATURE_HEADER);
    let timestamp = headers.contains(SLACK_TIMESTAMP_HEADER);
    let event = payload.event.as_ref();

    let indicators = vec![
        ("signature_header", signature),
        ("timestamp_header", timestamp),
        ("user_agent", user_agent_contains(headers, SLACK_USER_AGENT)),
        (
            "callback_type",
            payload
                .kind
                .as_deref()
                .map(|k| SLACK_CALLBACK_TYPES.contains(&k))
                .unwrap_or(false),
        ),
        (
            "team_id",
            payload
                .team_id
                .as_deref()
                .map(|t| !t.is_empty())
                .unwrap_or(false),
        ),
        ("event_object", event.is_some()),
        (
            "event_channel",
            event
                .and_then(|e| e.channel.as_ref())
                .map(|c| !c.is_null())
                .unwrap_or(false),
        ),
        (
            "message_event_type",
            event
                .and_then(|e| e.kind.as_deref())
                .map(|k| SLACK_MESSAGE_EVENT_TYPES.contains(&k))
                .unwrap_or(false),
        ),
    ];

    let matched = indicators.iter().filter(|(_, fired)| *fired).count();
    let strong = signature || timestamp;

    let confidence = if !strong && matched < 2 {
        Confidence::None
    } else if signature || matched >= 4 {
        Confidence::High
    } else if matched >= 2 {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    Score {
        source: Source::Slack,
        matched,
        confidence,
        indicators,
    }
}

fn score_calendly(payload: &CalendlyPayload, headers: &InboundHeaders) -> Score {
    let signature = headers.contains(CALENDLY_SIGNATURE_HEADER);
    let event_name = payload.event.as_deref();
    let lifecycle = event_name
        .map(|e| CALENDLY_LIFECYCLE_EVENTS.contains(&e))
        .unwrap_or(false);

    let indicators = vec![
        ("signature_header", signature),
        ("user_agent", user_agent_contains(headers, CALENDLY_USER_AGENT)),
        ("lifecycle_event", lifecycle),
        (
            "event_type_kind",
            payload
                .event_type_kind()
                .map(|k| k.eq_ignore_ascii_case(CALENDLY_USER_AGENT))
                .unwrap_or(false),
        ),
        (
            "event_names_provider",
            event_name
                .map(|e| e.to_ascii_lowercase().contains(CALENDLY_USER_AGENT))
                .unwrap_or(false),
        ),
    ];

    let matched = indicators.iter().filter(|(_, fired)| *fired).count();
    let strong = signature || lifecycle;

    let confidence = if matched >= 3 {
        Confidence::High
    } else if strong {
        Confidence::Medium
    } else {
        Confidence::None
    };

    Score {
        source: Source::Calendly,
        matched,
        confidence,
        indicators,
    }
}

/// Attribute `payload` to a provider
///
/// When both providers claim the payload, the stronger confidence wins, then
/// the larger indicator count. An exact tie is reported as unknown.
pub fn classify(payload: &Value, headers: &InboundHeaders) -> Classification {
    let slack_view = SlackPayload::from_value(payload);
    let calendly_view = CalendlyPayload::from_value(payload);

    let slack = score_slack(&slack_view, headers);
    let calendly = score_calendly(&calendly_view, headers);

    let winner = match (slack.confidence, calendly.confidence) {
        (Confidence::None, Confidence::None) => None,
        (_, Confidence::None) => Some(&slack),
        (Confidence::None, _) => Some(&calendly),
        (s, c) => match (s, slack.matched).cmp(&(c, calendly.matched)) {
            std::cmp::Ordering::Greater => Some(&slack),
            std::cmp::Ordering::Less => Some(&calendly),
            std::cmp::Ordering::Equal => None,
        },
    };

    let mut indicators = BTreeMap::new();
    for score in [&slack, &calendly] {
        for (name, fired) in &score.indicators {
            indicators.insert(format!("{}.{}", score.source.as_str(), name), *fired);
        }
    }

    let mut details = BTreeMap::new();
    details.insert(
        "scores".to_string(),
        json!({
            "slack": {"matched": slack.matched, "confidence": slack.confidence},
            "calendly": {"matched": calendly.matched, "confidence": calendly.confidence},
        }),
    );

    let (source, confidence) = match winner {
        Some(score) => (score.source, score.confidence),
        None => (Source::Unknown, Confidence::None),
    };

    match source {
        Source::Slack => {
            let event_type = slack_view.event.as_ref().and_then(|e| e.kind.clone());
            if let Some(kind) = event_type.or_else(|| slack_view.kind.clone()) {
                details.insert("event_type".to_string(), Value::String(kind));
            }
            if let Some(team) = slack_view.team() {
                details.insert("team_id".to_string(), Value::String(team.to_string()));
            }
            if let Some(channel) = slack_view.channel() {
                details.insert("channel".to_string(), Value::String(channel.to_string()));
            }
        }
        Source::Calendly => {
            if let Some(event) = &calendly_view.event {
                details.insert("event_type".to_string(), Value::String(event.clone()));
            }
        }
        Source::Unknown => {}
    }

    Classification {
        source,
        confidence,
        indicators,
        details,
    }
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod tests;
