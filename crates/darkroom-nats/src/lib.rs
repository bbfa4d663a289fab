//! NATS JetStream KV shared cache tier for Darkroom.

mod kv;
pub mod config;
pub mod health;
pub mod metrics;

pub use config::{KvStorage, NatsKvConfig};
pub use health::{HealthCheck, HealthStatus};
pub use kv::NatsKvTier;
pub use metrics::{KvMetrics, MetricsSnapshot};
