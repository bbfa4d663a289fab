//! Ordered multi-tier cache with per-tier circuit breakers.

use crate::breaker::{BreakerConfig, CircuitBreaker, TierHealth};
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use bytes::Bytes;
use darkroom_core::ports::CacheTier;
use darkroom_core::{CacheKey, Result, TierId};
use darkroom_trace::tier_span;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieredCacheConfig {
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// TTL applied when a hit is copied into faster tiers.
    #[serde(default = "default_backfill_ttl_secs")]
    pub backfill_ttl_secs: u64,
}

fn default_backfill_ttl_secs() -> u64 {
    3600
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            backfill_ttl_secs: default_backfill_ttl_secs(),
        }
    }
}

impl TieredCacheConfig {
    /// Keep backfilled copies from outliving entries written with `ttl`.
    ///
    /// Zero means "never expires" on either side.
    pub fn capped_at(mut self, ttl: Duration) -> Self {
        if ttl.is_zero() {
            return self;
        }
        let cap = ttl.as_secs().max(1);
        self.backfill_ttl_secs = match self.backfill_ttl_secs {
            0 => cap,
            secs => secs.min(cap),
        };
        self
    }
}

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub payload: Bytes,
    pub tier: TierId,
}

/// Which tiers accepted a write or delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutReport {
    pub stored: Vec<TierId>,
    pub failed: Vec<TierId>,
    /// Tiers bypassed because their circuit was open.
    pub skipped: Vec<TierId>,
}

impl PutReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

struct Slot {
    tier: Arc<dyn CacheTier>,
    breaker: CircuitBreaker,
}

impl Slot {
    fn record<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
    }
}

struct Shared {
    slots: Vec<Slot>,
    metrics: CacheMetrics,
    backfill_ttl: Duration,
}

/// Cache over tiers ordered fastest first.
///
/// Tier failures never surface to callers: a failing read is treated as a miss
/// for that tier and counted by its breaker. Cloning is cheap and shares state.
#[derive(Clone)]
pub struct TieredCache {
    shared: Arc<Shared>,
}

impl TieredCache {
    pub fn new(tiers: Vec<Arc<dyn CacheTier>>, config: TieredCacheConfig) -> Self {
        let metrics = CacheMetrics::new(tiers.iter().map(|t| t.id().clone()));
        let slots = tiers
            .into_iter()
            .map(|tier| Slot {
                breaker: CircuitBreaker::new(tier.id().clone(), config.breaker.clone()),
                tier,
            })
            .collect();

        Self {
            shared: Arc::new(Shared {
                slots,
                metrics,
                backfill_ttl: Duration::from_secs(config.backfill_ttl_secs),
            }),
        }
    }

    pub fn tier_ids(&self) -> Vec<TierId> {
        self.shared.slots.iter().map(|s| s.tier.id().clone()).collect()
    }

    /// Look `key` up tier by tier, fastest first.
    ///
    /// A hit in a slower tier is copied into the faster routable tiers in the
    /// background.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheHit> {
        let shared = &self.shared;
        for (index, slot) in shared.slots.iter().enumerate() {
            let tier = slot.tier.id();
            if !slot.breaker.allow() {
                shared.metrics.record_breaker_skip();
                debug!(tier = %tier, key = %key, "Tier circuit open, skipping");
                continue;
            }

            let result = slot
                .tier
                .get(key)
                .instrument(tier_span(tier.as_str(), "get"))
                .await;
            slot.record(&result);
            match result {
                Ok(Some(payload)) => {
                    shared.metrics.record_hit(index);
                    debug!(tier = %tier, key = %key, hit = true, "Cache hit");
                    if index > 0 {
                        self.spawn_backfill(key.clone(), payload.clone(), index);
                    }
                    return Some(CacheHit {
                        payload,
                        tier: tier.clone(),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    shared.metrics.record_get_failure();
                    warn!(tier = %tier, key = %key, error = %e, "Tier read failed, treating as miss");
                }
            }
        }

        shared.metrics.record_miss();
        debug!(key = %key, hit = false, "Cache miss");
        None
    }

    fn spawn_backfill(&self, key: CacheKey, payload: Bytes, hit_index: usize) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            for slot in &shared.slots[..hit_index] {
                if !slot.breaker.allow() {
                    shared.metrics.record_breaker_skip();
                    continue;
                }
                let result = slot.tier.put(&key, payload.clone(), shared.backfill_ttl).await;
                slot.record(&result);
                match result {
                    Ok(()) => shared.metrics.record_backfill(),
                    Err(e) => {
                        warn!(tier = %slot.tier.id(), key = %key, error = %e, "Backfill failed")
                    }
                }
            }
        });
    }

    /// Write to every routable tier concurrently.
    pub async fn put(&self, key: &CacheKey, payload: Bytes, ttl: Duration) -> PutReport {
        let shared = &self.shared;
        let mut report = PutReport::default();
        let mut writes = Vec::new();

        for slot in &shared.slots {
            if slot.breaker.allow() {
                let payload = payload.clone();
                writes.push(async move { (slot, slot.tier.put(key, payload, ttl).await) });
            } else {
                shared.metrics.record_breaker_skip();
                report.skipped.push(slot.tier.id().clone());
            }
        }

        for (slot, result) in join_all(writes).await {
            slot.record(&result);
            shared.metrics.record_put(result.is_ok());
            match result {
                Ok(()) => report.stored.push(slot.tier.id().clone()),
                Err(e) => {
                    warn!(tier = %slot.tier.id(), key = %key, error = %e, "Tier write failed");
                    report.failed.push(slot.tier.id().clone());
                }
            }
        }

        report
    }

    /// Remove `key` from every routable tier.
    pub async fn delete(&self, key: &CacheKey) -> PutReport {
        let mut report = PutReport::default();
        let mut deletes = Vec::new();

        for slot in &self.shared.slots {
            if slot.breaker.allow() {
                deletes.push(async move { (slot, slot.tier.delete(key).await) });
            } else {
                report.skipped.push(slot.tier.id().clone());
            }
        }

        for (slot, result) in join_all(deletes).await {
            slot.record(&result);
            match result {
                Ok(()) => report.stored.push(slot.tier.id().clone()),
                Err(e) => {
                    warn!(tier = %slot.tier.id(), key = %key, error = %e, "Tier delete failed");
                    report.failed.push(slot.tier.id().clone());
                }
            }
        }

        report
    }

    pub fn health(&self) -> Vec<TierHealth> {
        self.shared
            .slots
            .iter()
            .map(|s| s.breaker.health(s.tier.kind()))
            .collect()
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}
