//! # Idempotency Cache
//!
//! Time-bounded, in-memory record of event identities that have already been
//! accepted for forwarding. The cache is process-local and is cleared on
//! restart.
//!
//! All reads and writes go through a single mutex. [`IdempotencyCache::check_and_mark`]
//! performs the lookup and the insert inside one critical section, so two
//! concurrent deliveries of the same identity cannot both be accepted.
//!
//! Expired entries are removed by [`IdempotencyCache::sweep_expired`], which runs
//! opportunistically once the map grows past `sweep_threshold` and periodically
//! from the task started by [`IdempotencyCache::spawn_sweeper`].

use crate::{EventIdentity, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Configuration for the idempotency cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub ttl_seconds: u64,
    /// Map size above which inserts trigger an inline sweep
    pub sweep_threshold: usize,
    pub sweep_interval_seconds: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 30 * 60,
            sweep_threshold: 10_000,
            sweep_interval_seconds: 60,
        }
    }
}

impl DedupConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ttl_seconds == 0 {
            return Err(ValidationError::OutOfRange {
                field: "dedup.ttl_seconds".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.sweep_interval_seconds == 0 {
            return Err(ValidationError::OutOfRange {
                field: "dedup.sweep_interval_seconds".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// Record of an accepted identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupEntry {
    pub first_seen_at: Instant,
}

impl DedupEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.first_seen_at) > ttl
    }
}

/// Errors raised by the idempotency cache
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Idempotency cache lock was poisoned by a panicking request")]
    Poisoned,
}

/// Process-local set of recently accepted identities
#[derive(Debug)]
pub struct IdempotencyCache {
    entries: Mutex<HashMap<EventIdentity, DedupEntry>>,
    ttl: Duration,
    sweep_threshold: usize,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration, sweep_threshold: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            sweep_threshold,
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(config.ttl(), config.sweep_threshold)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<EventIdentity, DedupEntry>>, CacheError> {
        self.entries.lock().map_err(|_| CacheError::Poisoned)
    }

    /// Whether `identity` was accepted within the TTL window
    pub fn seen(&self, identity: &EventIdentity) -> Result<bool, CacheError> {
        let entries = self.lock()?;
        let now = Instant::now();
        Ok(entries
            .get(identity)
            .map(|entry| !entry.is_expired(now, self.ttl))
            .unwrap_or(false))
    }

    /// Record `identity`, keeping the original first-seen time of a live entry
    pub fn mark_seen(&self, identity: &EventIdentity) -> Result<(), CacheError> {
        self.check_and_mark(identity).map(|_| ())
    }

    /// Atomically test and record `identity`
    ///
    /// Returns `true` when the identity was already present and live, i.e. the
    /// caller is looking at a duplicate and must not forward it.
    pub fn check_and_mark(&self, identity: &EventIdentity) -> Result<bool, CacheError> {
        let mut entries = self.lock()?;
        let now = Instant::now();

        if let Some(entry) = entries.get(identity) {
            if !entry.is_expired(now, self.ttl) {
                return Ok(true);
            }
        }

        entries.insert(identity.clone(), DedupEntry { first_seen_at: now });

        if entries.len() > self.sweep_threshold {
            let removed = Self::sweep_locked(&mut entries, now, self.ttl);
            debug!(removed, remaining = entries.len(), "Inline idempotency sweep");
        }

        Ok(false)
    }

    /// Forget `identity` so that a redelivery is processed again
    pub fn release(&self, identity: &EventIdentity) -> Result<bool, CacheError> {
        Ok(self.lock()?.remove(identity).is_some())
    }

    /// Remove all expired entries, returning how many were dropped
    pub fn sweep_expired(&self) -> Result<usize, CacheError> {
        let mut entries = self.lock()?;
        Ok(Self::sweep_locked(&mut entries, Instant::now(), self.ttl))
    }

    fn sweep_locked(
        entries: &mut HashMap<EventIdentity, DedupEntry>,
        now: Instant,
        ttl: Duration,
    ) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now, ttl));
        before - entries.len()
    }

    /// Number of entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start a background task sweeping expired entries every `interval`
    ///
    /// The task runs until the returned handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match cache.sweep_expired() {
                    Ok(removed) if removed > 0 => {
                        debug!(removed, remaining = cache.len(), "Swept idempotency cache");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Idempotency sweep failed; stopping sweeper");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "dedup_tests.rs"]
mod tests;
