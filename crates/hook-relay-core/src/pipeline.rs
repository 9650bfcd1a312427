//! # Ingress Pipeline
//!
//! Sequences the stages for one inbound request:
//!
//! ```text
//! Received -> Unwrapped -> Classified -> ChallengeEcho | Deduplicated | Forwarding -> Responded
//! ```
//!
//! Subscription handshakes and URL-verification challenges are answered
//! before classification and never reach the cache or the forwarder. Every
//! other request is classified, identified and checked against the
//! idempotency cache; unique events are forwarded from a spawned task. The
//! pipeline waits for that task up to the ingress deadline and otherwise
//! reports the forward as pending while it finishes in the background.
//!
//! Forwarding failures are reported through the [`Notifier`] and do not turn
//! into errors. The errors this pipeline returns are for malformed input,
//! failed signature checks and internal faults.

use crate::dedup::{CacheError, IdempotencyCache};
use crate::endpoint::{EndpointResolver, EndpointTarget, ResolveError};
use crate::forwarder::{EventForwarder, ForwardConfig, ForwardRequest, ForwardResult};
use crate::notifier::{Notifier, NotifyOptions};
use crate::signature::{NotificationVerifier, SignatureError, VerifierSet};
use crate::webhook::{
    classify, identify, unwrap, verification_challenge, Classification, Envelope, InboundMessage,
    SubscriptionRequest, WebhookError, WrapperKind,
};
use crate::{Environment, ErrorCategory, EventIdentity, Source};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, field, info, instrument, warn, Instrument, Span};

/// Pipeline state, used for log context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressStage {
    Received,
    Unwrapped,
    Classified,
    ChallengeEcho,
    Deduplicated,
    Forwarding,
    Responded,
}

impl fmt::Display for IngressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Unwrapped => "unwrapped",
            Self::Classified => "classified",
            Self::ChallengeEcho => "challenge_echo",
            Self::Deduplicated => "deduplicated",
            Self::Forwarding => "forwarding",
            Self::Responded => "responded",
        };
        f.write_str(name)
    }
}

/// Forward state at the time the pipeline answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardStatus {
    Completed(ForwardResult),
    /// Still running after the ingress deadline
    Pending,
}

impl ForwardStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(result) if result.success => "delivered",
            Self::Completed(_) => "failed",
            Self::Pending => "pending",
        }
    }
}

/// Terminal outcome of one request
#[derive(Debug, Clone)]
pub enum IngressOutcome {
    ChallengeEcho {
        challenge: String,
    },
    SubscriptionConfirmation(SubscriptionRequest),
    Duplicate {
        identity: EventIdentity,
        classification: Classification,
    },
    Accepted {
        identity: EventIdentity,
        classification: Classification,
        wrapper_kind: WrapperKind,
        forward: ForwardStatus,
    },
}

impl IngressOutcome {
    pub fn identity(&self) -> Option<&EventIdentity> {
        match self {
            Self::Duplicate { identity, .. } | Self::Accepted { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub fn source(&self) -> Option<Source> {
        match self {
            Self::Duplicate { classification, .. } | Self::Accepted { classification, .. } => {
                Some(classification.source)
            }
            _ => None,
        }
    }

    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::ChallengeEcho { .. } => "challenge",
            Self::SubscriptionConfirmation(_) => "subscription",
            Self::Duplicate { .. } => "duplicate",
            Self::Accepted { forward, .. } => forward.label(),
        }
    }
}

/// Errors that abort a single request
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error(transparent)]
    Malformed(#[from] WebhookError),

    #[error("Signature verification failed for {provider}: {error}")]
    Unauthorized {
        provider: Source,
        #[source]
        error: SignatureError,
    },

    #[error(transparent)]
    Routing(#[from] ResolveError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Internal error during {stage}: {message}")]
    Internal { stage: IngressStage, message: String },
}

impl IngressError {
    /// Get error category for monitoring and response mapping
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::Malformed(_) => ErrorCategory::Permanent,
            Self::Unauthorized { .. } => ErrorCategory::Security,
            Self::Routing(_) => ErrorCategory::Configuration,
            Self::Cache(_) | Self::Internal { .. } => ErrorCategory::Transient,
        }
    }
}

/// Composed ingestion pipeline, shared across requests
pub struct IngressPipeline {
    cache: Arc<IdempotencyCache>,
    resolver: EndpointResolver,
    forwarder: Arc<dyn EventForwarder>,
    notifier: Arc<dyn Notifier>,
    verifiers: VerifierSet,
    notification_verifier: Option<Arc<dyn NotificationVerifier>>,
    environment: Environment,
    ingress_deadline: Duration,
    default_user_agent: String,
}

impl fmt::Debug for IngressPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngressPipeline")
            .field("environment", &self.environment)
            .field("ingress_deadline", &self.ingress_deadline)
            .field("verifiers", &self.verifiers)
            .field("trusts_notifications", &self.notification_verifier.is_some())
            .finish_non_exhaustive()
    }
}

impl IngressPipeline {
    pub fn new(
        cache: Arc<IdempotencyCache>,
        resolver: EndpointResolver,
        forwarder: Arc<dyn EventForwarder>,
        notifier: Arc<dyn Notifier>,
        environment: Environment,
    ) -> Self {
        let defaults = ForwardConfig::default();
        Self {
            cache,
            resolver,
            forwarder,
            notifier,
            verifiers: VerifierSet::default(),
            notification_verifier: None,
            environment,
            ingress_deadline: defaults.ingress_deadline(),
            default_user_agent: defaults.user_agent,
        }
    }

    pub fn with_verifiers(mut self, verifiers: VerifierSet) -> Self {
        self.verifiers = verifiers;
        self
    }

    /// Trust wrapped payloads whose notification frame passes `verifier`
    ///
    /// Without one, every wrapped payload is held to provider signature checks.
    pub fn with_notification_verifier(mut self, verifier: Arc<dyn NotificationVerifier>) -> Self {
        self.notification_verifier = Some(verifier);
        self
    }

    pub fn with_forward_config(mut self, config: &ForwardConfig) -> Self {
        self.ingress_deadline = config.ingress_deadline();
        self.default_user_agent = config.user_agent.clone();
        self
    }

    pub fn cache(&self) -> &Arc<IdempotencyCache> {
        &self.cache
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Process one inbound request to its terminal outcome
    #[instrument(
        name = "ingress",
        skip_all,
        fields(source = field::Empty, identity = field::Empty, wrapper = field::Empty)
    )]
    pub async fn ingest(&self, message: InboundMessage) -> Result<IngressOutcome, IngressError> {
        let span = Span::current();

        let body = message.structured()?;
        let envelope = unwrap(body);
        span.record("wrapper", field::debug(envelope.wrapper_kind));
        debug!(stage = %IngressStage::Unwrapped, aux_fields = envelope.aux_fields.len(), "Unwrapped inbound body");

        if let Some(subscription) = &envelope.subscription {
            info!(topic = %subscription.topic_arn, "Received subscription confirmation request");
            return Ok(IngressOutcome::SubscriptionConfirmation(subscription.clone()));
        }

        let payload = envelope.reattached_payload();

        if let Some(challenge) = verification_challenge(&payload) {
            info!(stage = %IngressStage::ChallengeEcho, "Answering URL verification challenge");
            return Ok(IngressOutcome::ChallengeEcho {
                challenge: challenge.to_string(),
            });
        }

        let classification = classify(&payload, &message.headers);
        let source = classification.source;
        span.record("source", source.as_str());
        debug!(
            stage = %IngressStage::Classified,
            confidence = %classification.confidence,
            slack_indicators = classification.matched(Source::Slack),
            calendly_indicators = classification.matched(Source::Calendly),
            "Classified payload"
        );

        if let Some(tag) = envelope.source_tag.as_deref() {
            if classification.is_known() && !tag.eq_ignore_ascii_case(source.as_str()) {
                warn!(tag, classified = %source, "Envelope source tag disagrees with classification");
            }
        }
        if !classification.is_known() {
            info!("Unrecognised source; routing to default endpoint");
        }

        if self.requires_provider_signature(&envelope) {
            if let Some(verifier) = self.verifiers.get(source) {
                verifier
                    .verify(&message.headers, &message.raw_body)
                    .map_err(|error| {
                        warn!(error = %error, "Rejected delivery with invalid signature");
                        IngressError::Unauthorized {
                            provider: source,
                            error,
                        }
                    })?;
            }
        }

        let identity = identify(source, &payload);
        span.record("identity", identity.as_str());

        if self.cache.check_and_mark(&identity)? {
            info!(stage = %IngressStage::Deduplicated, "Duplicate delivery; not forwarding");
            return Ok(IngressOutcome::Duplicate {
                identity,
                classification,
            });
        }

        let target = match self.resolver.resolve(source, self.environment) {
            Ok(target) => target,
            Err(e) => {
                error!(error = %e, "No downstream endpoint for event");
                self.release(&identity);
                return Err(e.into());
            }
        };

        let request = ForwardRequest::build(
            identity.clone(),
            source,
            payload,
            &envelope.aux_fields,
            &message.headers,
            &self.default_user_agent,
        );

        debug!(stage = %IngressStage::Forwarding, primary = %target.primary_url, fallbacks = target.fallback_urls.len(), "Forwarding event");
        let mut handle = self.spawn_forward(target, request);

        let forward = match tokio::time::timeout(self.ingress_deadline, &mut handle).await {
            Ok(Ok(result)) => ForwardStatus::Completed(result),
            Ok(Err(join_error)) => {
                error!(error = %join_error, "Forward task aborted");
                self.release(&identity);
                return Err(IngressError::Internal {
                    stage: IngressStage::Forwarding,
                    message: join_error.to_string(),
                });
            }
            Err(_) => {
                info!(
                    deadline_ms = self.ingress_deadline.as_millis() as u64,
                    "Forward still in progress at ingress deadline; continuing in background"
                );
                self.notifier.notify(
                    &format!("Forward for {} event {} still pending", source, identity),
                    NotifyOptions::info(json!({
                        "identity": identity,
                        "deadline_ms": self.ingress_deadline.as_millis() as u64,
                    })),
                );
                ForwardStatus::Pending
            }
        };

        debug!(stage = %IngressStage::Responded, forward = forward.label(), "Ingress complete");
        Ok(IngressOutcome::Accepted {
            identity,
            classification,
            wrapper_kind: envelope.wrapper_kind,
            forward,
        })
    }

    /// Direct deliveries always need one; wrapped payloads only when their frame is not trusted
    fn requires_provider_signature(&self, envelope: &Envelope) -> bool {
        if !envelope.is_wrapped() {
            return true;
        }
        let (Some(verifier), Some(frame)) = (&self.notification_verifier, &envelope.frame) else {
            return true;
        };
        match verifier.verify(frame) {
            Ok(()) => false,
            Err(error) => {
                warn!(error = %error, "Untrusted notification frame; checking provider signature");
                true
            }
        }
    }

    fn release(&self, identity: &EventIdentity) {
        if let Err(e) = self.cache.release(identity) {
            error!(error = %e, identity = %identity, "Failed to release identity");
        }
    }

    fn spawn_forward(
        &self,
        target: EndpointTarget,
        request: ForwardRequest,
    ) -> JoinHandle<ForwardResult> {
        let forwarder = Arc::clone(&self.forwarder);
        let notifier = Arc::clone(&self.notifier);

        tokio::spawn(
            async move {
                let result = forwarder.forward(&target, &request).await;
                if result.success {
                    info!(
                        url = result.used_url.as_deref().unwrap_or_default(),
                        status = result.status_code,
                        attempts = result.attempts,
                        elapsed_ms = result.elapsed_ms,
                        "Event forwarded"
                    );
                } else {
                    error!(
                        attempts = result.attempts,
                        error = result.error.as_deref().unwrap_or_default(),
                        "All forward attempts failed"
                    );
                    notifier.notify(
                        &format!(
                            "Forwarding failed for {} event {}",
                            request.source, request.identity
                        ),
                        NotifyOptions::error(json!({
                            "identity": request.identity,
                            "source": request.source,
                            "primary_url": target.primary_url,
                            "fallback_urls": target.fallback_urls,
                            "attempts": result.attempts,
                            "status_code": result.status_code,
                            "error": result.error,
                        })),
                    );
                }
                result
            }
            .instrument(Span::current()),
        )
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
