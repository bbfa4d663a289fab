//! Tiered cache for stage outputs.
//!
//! Tiers are ordered fastest first: an in-process LRU, a shared network tier
//! (see `darkroom-nats`), and a durable object store. [`TieredCache`] routes
//! around unhealthy tiers with per-tier circuit breakers.

pub mod breaker;
pub mod compression;
pub mod durable;
pub mod envelope;
pub mod memory;
pub mod metrics;
pub mod provider;
pub mod s3;
pub mod tiered;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker, TierHealth};
pub use compression::{CompressionType, compress, decompress};
pub use durable::{DurableTier, DurableTierConfig};
pub use envelope::{ContentKind, Envelope};
pub use memory::{MemoryTier, MemoryTierConfig};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use provider::FilesystemObjectStore;
pub use s3::{S3Config, S3ObjectStore};
pub use tiered::{CacheHit, PutReport, TieredCache, TieredCacheConfig};
