//! Prometheus metrics for the ingest service.
//!
//! Metrics live in a per-instance [`Registry`] so several routers (tests,
//! multiple servers in one process) never collide on registration.

use hook_relay_core::{ErrorCategory, ForwardStatus, IngressError, IngressOutcome, Source};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

const NAMESPACE: &str = "hook_relay";

/// Service metrics for observability
#[derive(Debug)]
pub struct ServiceMetrics {
    registry: Registry,

    // Ingress metrics
    pub ingress_requests_total: IntCounterVec,
    pub ingress_duration_seconds: Histogram,
    pub classifications_total: IntCounterVec,
    pub signature_failures_total: IntCounter,

    // Dedup metrics
    pub dedup_hits_total: IntCounter,
    pub dedup_cache_entries: IntGauge,

    // Forwarding metrics
    pub forward_attempts_total: IntCounter,
    pub forward_failures_total: IntCounter,
    pub forward_pending_total: IntCounter,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new_custom(Some(NAMESPACE.to_string()), None)?;

        let metrics = Self {
            ingress_requests_total: IntCounterVec::new(
                Opts::new("ingress_requests_total", "Ingest requests by outcome"),
                &["outcome"],
            )?,
            ingress_duration_seconds: Histogram::with_opts(
                HistogramOpts::new(
                    "ingress_duration_seconds",
                    "Time from request receipt to response",
                )
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0]),
            )?,
            classifications_total: IntCounterVec::new(
                Opts::new("classifications_total", "Classified payloads by source"),
                &["source"],
            )?,
            signature_failures_total: IntCounter::new(
                "signature_failures_total",
                "Requests rejected by provider signature verification",
            )?,
            dedup_hits_total: IntCounter::new(
                "dedup_hits_total",
                "Deliveries suppressed as duplicates",
            )?,
            dedup_cache_entries: IntGauge::new(
                "dedup_cache_entries",
                "Identities currently held by the idempotency cache",
            )?,
            forward_attempts_total: IntCounter::new(
                "forward_attempts_total",
                "Downstream POST attempts, fallbacks included",
            )?,
            forward_failures_total: IntCounter::new(
                "forward_failures_total",
                "Events for which every downstream endpoint failed",
            )?,
            forward_pending_total: IntCounter::new(
                "forward_pending_total",
                "Forwards still running when the ingress deadline passed",
            )?,
            registry,
        };

        metrics.register_all()?;
        Ok(Arc::new(metrics))
    }

    fn register_all(&self) -> Result<(), prometheus::Error> {
        let r = &self.registry;
        r.register(Box::new(self.ingress_requests_total.clone()))?;
        r.register(Box::new(self.ingress_duration_seconds.clone()))?;
        r.register(Box::new(self.classifications_total.clone()))?;
        r.register(Box::new(self.signature_failures_total.clone()))?;
        r.register(Box::new(self.dedup_hits_total.clone()))?;
        r.register(Box::new(self.dedup_cache_entries.clone()))?;
        r.register(Box::new(self.forward_attempts_total.clone()))?;
        r.register(Box::new(self.forward_failures_total.clone()))?;
        r.register(Box::new(self.forward_pending_total.clone()))?;

        #[cfg(target_os = "linux")]
        r.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(())
    }

    pub fn record_outcome(&self, outcome: &IngressOutcome, duration: Duration) {
        self.ingress_requests_total
            .with_label_values(&[outcome.label()])
            .inc();
        self.ingress_duration_seconds
            .observe(duration.as_secs_f64());

        if let Some(source) = outcome.source() {
            self.record_classification(source);
        }

        match outcome {
            IngressOutcome::Duplicate { .. } => self.dedup_hits_total.inc(),
            IngressOutcome::Accepted { forward, .. } => match forward {
                ForwardStatus::Completed(result) => {
                    self.forward_attempts_total.inc_by(u64::from(result.attempts));
                    if !result.success {
                        self.forward_failures_total.inc();
                    }
                }
                ForwardStatus::Pending => self.forward_pending_total.inc(),
            },
            _ => {}
        }
    }

    pub fn record_error(&self, error: &IngressError, duration: Duration) {
        let label = match error.error_category() {
            ErrorCategory::Permanent => "malformed",
            ErrorCategory::Security => "unauthorized",
            ErrorCategory::Transient | ErrorCategory::Configuration => "error",
        };
        self.ingress_requests_total.with_label_values(&[label]).inc();
        self.ingress_duration_seconds
            .observe(duration.as_secs_f64());

        if let IngressError::Unauthorized { provider, .. } = error {
            self.signature_failures_total.inc();
            self.record_classification(*provider);
        }
    }

    pub fn set_cache_entries(&self, entries: usize) {
        self.dedup_cache_entries
            .set(i64::try_from(entries).unwrap_or(i64::MAX));
    }

    fn record_classification(&self, source: Source) {
        self.classifications_total
            .with_label_values(&[source.as_str()])
            .inc();
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
