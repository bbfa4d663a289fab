//! In-process LRU tier.

use async_trait::async_trait;
use bytes::Bytes;
use darkroom_core::ports::{CacheTier, Reclaimer, TierKind};
use darkroom_core::{CacheKey, Error, Result, TierId};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Configuration for [`MemoryTier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryTierConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// Fraction of `max_bytes` kept when the tier is asked to reclaim memory.
    #[serde(default = "default_reclaim_fraction")]
    pub reclaim_fraction: f64,
}

fn default_max_entries() -> usize {
    256
}

fn default_max_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_reclaim_fraction() -> f64 {
    0.5
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_bytes: default_max_bytes(),
            reclaim_fraction: default_reclaim_fraction(),
        }
    }
}

impl MemoryTierConfig {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

struct Entry {
    payload: Bytes,
    expires_at: Option<Instant>,
}

struct Inner {
    entries: LruCache<String, Entry>,
    bytes: u64,
}

impl Inner {
    fn pop(&mut self, key: &str) {
        if let Some(old) = self.entries.pop(key) {
            self.bytes -= old.payload.len() as u64;
        }
    }

    fn evict_to(&mut self, budget: u64) -> u64 {
        let mut freed = 0;
        while self.bytes > budget {
            match self.entries.pop_lru() {
                Some((_, entry)) => {
                    let len = entry.payload.len() as u64;
                    self.bytes -= len;
                    freed += len;
                }
                None => break,
            }
        }
        freed
    }
}

/// Bounded LRU over stage outputs, limited by entry count and total bytes.
pub struct MemoryTier {
    id: TierId,
    config: MemoryTierConfig,
    inner: Mutex<Inner>,
}

impl MemoryTier {
    /// Returns an error if `max_entries` is 0.
    pub fn new(config: MemoryTierConfig) -> Result<Self> {
        let capacity = NonZeroUsize::new(config.max_entries)
            .ok_or_else(|| Error::Config("memory tier max_entries must be non-zero".into()))?;

        Ok(Self {
            id: TierId::new("memory"),
            config,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                bytes: 0,
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Total payload bytes currently held.
    pub fn size_bytes(&self) -> u64 {
        self.inner.lock().bytes
    }

    /// Evict least-recently-used entries until at most `budget` bytes remain.
    pub fn trim_to(&self, budget: u64) -> u64 {
        self.inner.lock().evict_to(budget)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.bytes = 0;
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn id(&self) -> &TierId {
        &self.id
    }

    fn kind(&self) -> TierKind {
        TierKind::InProcess
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let digest = key.digest();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(&digest) {
            Some(entry) => match entry.expires_at {
                Some(at) if at <= Instant::now() => true,
                _ => return Ok(Some(entry.payload.clone())),
            },
            None => return Ok(None),
        };

        if expired {
            inner.pop(&digest);
        }
        Ok(None)
    }

    async fn put(&self, key: &CacheKey, payload: Bytes, ttl: Duration) -> Result<()> {
        let len = payload.len() as u64;
        if len > self.config.max_bytes {
            debug!(key = %key, size = len, "Payload exceeds memory tier budget, not stored");
            return Ok(());
        }

        let digest = key.digest();
        let entry = Entry {
            payload,
            expires_at: (!ttl.is_zero()).then(|| Instant::now() + ttl),
        };

        let mut inner = self.inner.lock();
        inner.pop(&digest);
        if let Some((_, evicted)) = inner.entries.push(digest, entry) {
            inner.bytes -= evicted.payload.len() as u64;
        }
        inner.bytes += len;
        let budget = self.config.max_bytes;
        inner.evict_to(budget);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.inner.lock().pop(&key.digest());
        Ok(())
    }
}

impl Reclaimer for MemoryTier {
    fn name(&self) -> &str {
        self.id.as_str()
    }

    fn reclaim(&self) -> Result<u64> {
        let budget = (self.config.max_bytes as f64 * self.config.reclaim_fraction) as u64;
        let freed = self.trim_to(budget);
        debug!(freed, budget, "Memory tier trimmed");
        Ok(freed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkroom_core::{ContentFingerprint, StageKind, StageParams};

    fn key(n: u8) -> CacheKey {
        CacheKey::new(
            &StageKind::BackgroundRemoval,
            "1",
            &ContentFingerprint::from_digest(&[n; 32]),
            &StageParams::new(),
        )
    }

    fn tier(entries: usize, bytes: u64) -> MemoryTier {
        MemoryTier::new(
            MemoryTierConfig::default()
                .with_max_entries(entries)
                .with_max_bytes(bytes),
        )
        .unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(MemoryTier::new(MemoryTierConfig::default().with_max_entries(0)).is_err());
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let tier = tier(4, 1024);
        assert!(tier.get(&key(1)).await.unwrap().is_none());

        tier.put(&key(1), Bytes::from_static(b"out"), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(tier.get(&key(1)).await.unwrap().unwrap(), "out");

        tier.delete(&key(1)).await.unwrap();
        assert!(tier.get(&key(1)).await.unwrap().is_none());
        assert_eq!(tier.size_bytes(), 0);
    }

    #[tokio::test]
    async fn test_count_bound_evicts_lru() {
        let tier = tier(2, 1024);
        for n in 1..=3 {
            tier.put(&key(n), Bytes::from(vec![n; 8]), Duration::ZERO)
                .await
                .unwrap();
        }
        assert_eq!(tier.len(), 2);
        assert!(tier.get(&key(1)).await.unwrap().is_none());
        assert_eq!(tier.size_bytes(), 16);
    }

    #[tokio::test]
    async fn test_byte_bound_evicts_and_skips_oversized() {
        let tier = tier(16, 100);
        tier.put(&key(1), Bytes::from(vec![0; 60]), Duration::ZERO)
            .await
            .unwrap();
        tier.put(&key(2), Bytes::from(vec![0; 60]), Duration::ZERO)
            .await
            .unwrap();
        assert!(tier.get(&key(1)).await.unwrap().is_none());
        assert!(tier.get(&key(2)).await.unwrap().is_some());

        tier.put(&key(3), Bytes::from(vec![0; 101]), Duration::ZERO)
            .await
            .unwrap();
        assert!(tier.get(&key(3)).await.unwrap().is_none());
        assert_eq!(tier.size_bytes(), 60);
    }

    #[tokio::test]
    async fn test_overwrite_accounts_bytes() {
        let tier = tier(4, 1024);
        tier.put(&key(1), Bytes::from(vec![0; 10]), Duration::ZERO)
            .await
            .unwrap();
        tier.put(&key(1), Bytes::from(vec![0; 30]), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(tier.size_bytes(), 30);
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let tier = tier(4, 1024);
        tier.put(&key(1), Bytes::from_static(b"x"), Duration::from_secs(5))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(tier.get(&key(1)).await.unwrap().is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(tier.get(&key(1)).await.unwrap().is_none());
        assert_eq!(tier.size_bytes(), 0);
    }

    #[tokio::test]
    async fn test_reclaim_trims_to_fraction() {
        let tier = tier(16, 100);
        for n in 1..=4 {
            tier.put(&key(n), Bytes::from(vec![0; 20]), Duration::ZERO)
                .await
                .unwrap();
        }
        let freed = tier.reclaim().unwrap();
        assert_eq!(freed, 40);
        assert_eq!(tier.size_bytes(), 40);
        assert!(tier.get(&key(4)).await.unwrap().is_some());
    }
}
