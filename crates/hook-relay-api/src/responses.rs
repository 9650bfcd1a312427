//! Response types for the API.

use hook_relay_core::{Environment, EventIdentity, ForwardStatus, Source, Timestamp};
use serde::{Deserialize, Serialize};

// ============================================================================
// Ingest Responses
// ============================================================================

/// Body returned for accepted and duplicate deliveries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    pub id: EventIdentity,
    pub source: Source,

    /// Only present (and `true`) for a redelivery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,

    /// `delivered`, `failed` or `pending`; absent for duplicates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded: Option<String>,
}

impl IngestResponse {
    pub fn accepted(id: EventIdentity, source: Source, forward: &ForwardStatus) -> Self {
        Self {
            success: true,
            id,
            source,
            duplicate: None,
            forwarded: Some(forward.label().to_string()),
        }
    }

    pub fn duplicate(id: EventIdentity, source: Source) -> Self {
        Self {
            success: true,
            id,
            source,
            duplicate: Some(true),
            forwarded: None,
        }
    }
}

/// Echo of a URL verification challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub challenge: String,
}

/// Result of a pub/sub subscription handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub success: bool,
    pub subscribed: bool,
    pub topic: String,
}

// ============================================================================
// Operational Responses
// ============================================================================

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: Timestamp,
    pub version: String,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub timestamp: Timestamp,
}

/// Runtime summary for operators
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub service: String,
    pub version: String,
    pub environment: Environment,
    pub uptime_seconds: u64,
    pub ingest_path: String,
    pub dedup: DedupStatus,
    /// Sources with their own downstream URL in the active environment
    pub routed_sources: Vec<Source>,
    /// Sources whose direct deliveries are signature-checked
    pub verified_sources: Vec<Source>,
}

#[derive(Debug, Serialize)]
pub struct DedupStatus {
    pub entries: usize,
    pub ttl_seconds: u64,
}
