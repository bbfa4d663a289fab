//! Counters for tiered cache observability.

use darkroom_core::TierId;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for a [`TieredCache`](crate::TieredCache).
#[derive(Debug)]
pub struct CacheMetrics {
    tier_hits: Vec<(TierId, AtomicU64)>,
    /// Lookups that missed every tier.
    pub misses: AtomicU64,
    /// Successful tier writes.
    pub puts: AtomicU64,
    /// Failed tier writes.
    pub put_failures: AtomicU64,
    /// Failed tier reads.
    pub get_failures: AtomicU64,
    /// Successful backfills into faster tiers.
    pub backfills: AtomicU64,
    /// Tier calls skipped because the tier's circuit was open.
    pub breaker_skips: AtomicU64,
}

impl CacheMetrics {
    pub fn new(tiers: impl IntoIterator<Item = TierId>) -> Self {
        Self {
            tier_hits: tiers.into_iter().map(|id| (id, AtomicU64::new(0))).collect(),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            put_failures: AtomicU64::new(0),
            get_failures: AtomicU64::new(0),
            backfills: AtomicU64::new(0),
            breaker_skips: AtomicU64::new(0),
        }
    }

    pub fn record_hit(&self, tier_index: usize) {
        if let Some((_, counter)) = self.tier_hits.get(tier_index) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_put(&self, ok: bool) {
        let counter = if ok { &self.puts } else { &self.put_failures };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_get_failure(&self) {
        self.get_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backfill(&self) {
        self.backfills.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_breaker_skip(&self) {
        self.breaker_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self
                .tier_hits
                .iter()
                .map(|(id, n)| (id.clone(), n.load(Ordering::Relaxed)))
                .collect(),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            put_failures: self.put_failures.load(Ordering::Relaxed),
            get_failures: self.get_failures.load(Ordering::Relaxed),
            backfills: self.backfills.load(Ordering::Relaxed),
            breaker_skips: self.breaker_skips.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of cache metrics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: Vec<(TierId, u64)>,
    pub misses: u64,
    pub puts: u64,
    pub put_failures: u64,
    pub get_failures: u64,
    pub backfills: u64,
    pub breaker_skips: u64,
}

impl CacheMetricsSnapshot {
    pub fn total_hits(&self) -> u64 {
        self.hits.iter().map(|(_, n)| n).sum()
    }

    pub fn hits_for(&self, tier: &str) -> u64 {
        self.hits
            .iter()
            .find(|(id, _)| id.as_str() == tier)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}
