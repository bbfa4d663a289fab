//! JetStream KV-backed shared cache tier.

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use darkroom_cache::Envelope;
use darkroom_core::ports::{CacheTier, TierKind};
use darkroom_core::{CacheKey, Error, Result, TierId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{KvStorage, NatsKvConfig};
use crate::health::HealthCheck;
use crate::metrics::{KvMetrics, LatencyTimer};

/// Shared tier storing enveloped stage outputs in a JetStream KV bucket.
///
/// The bucket's `max_age` bounds every value; shorter per-put TTLs are carried
/// in the envelope and enforced on read.
#[derive(Clone)]
pub struct NatsKvTier {
    id: TierId,
    client: async_nats::Client,
    store: kv::Store,
    config: NatsKvConfig,
    metrics: Arc<KvMetrics>,
}

impl NatsKvTier {
    /// Connect and open the bucket, creating it if absent.
    pub async fn connect(config: NatsKvConfig) -> Result<Self> {
        let urls = config.urls.join(",");
        info!("Connecting to NATS at {}", urls);

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(config.connection_timeout())
            .request_timeout(Some(config.request_timeout()))
            .connect(&urls)
            .await
            .map_err(|e| Error::Network(format!("Failed to connect to NATS: {}", e)))?;

        let jetstream = jetstream::new(client.clone());
        let store = match jetstream.get_key_value(&config.bucket).await {
            Ok(store) => store,
            Err(_) => {
                let max_value_size = i32::try_from(config.max_value_size).map_err(|_| {
                    Error::Config(format!(
                        "max_value_size {} exceeds what JetStream accepts",
                        config.max_value_size
                    ))
                })?;
                jetstream
                    .create_key_value(kv::Config {
                        bucket: config.bucket.clone(),
                        history: 1,
                        max_age: config.max_age(),
                        max_value_size,
                        storage: match config.storage {
                            KvStorage::File => jetstream::stream::StorageType::File,
                            KvStorage::Memory => jetstream::stream::StorageType::Memory,
                        },
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| Error::Network(format!("Failed to create KV bucket: {}", e)))?
            }
        };

        info!(bucket = %config.bucket, "Connected to NATS and opened KV bucket");

        let metrics = KvMetrics::new();
        metrics.set_connected(true);

        Ok(Self {
            id: TierId::new("nats"),
            client,
            store,
            config,
            metrics,
        })
    }

    fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    fn ensure_connected(&self) -> Result<()> {
        let connected = self.is_connected();
        self.metrics.set_connected(connected);
        if connected {
            Ok(())
        } else {
            Err(Error::tier(self.id.as_str(), "not connected to NATS"))
        }
    }

    pub fn health_check(&self) -> HealthCheck {
        HealthCheck::from_metrics(&self.metrics, self.is_connected())
    }

    pub fn metrics(&self) -> Arc<KvMetrics> {
        Arc::clone(&self.metrics)
    }
}

#[async_trait]
impl CacheTier for NatsKvTier {
    fn id(&self) -> &TierId {
        &self.id
    }

    fn kind(&self) -> TierKind {
        TierKind::SharedNetwork
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        self.ensure_connected()?;
        let timer = LatencyTimer::start();

        let raw = self
            .store
            .get(key.digest())
            .await
            .map_err(|e| Error::tier(self.id.as_str(), e))?;
        let Some(raw) = raw else {
            self.metrics.record_miss();
            return Ok(None);
        };

        let envelope = match Envelope::decode(&raw) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                debug!(key = %key, "KV value is not a recognised envelope");
                self.metrics.record_rejected();
                return Ok(None);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt KV value, treating as miss");
                self.metrics.record_rejected();
                return Ok(None);
            }
        };

        if envelope.is_expired_at(Utc::now()) {
            debug!(key = %key, "KV value past its TTL");
            self.metrics.record_rejected();
            return Ok(None);
        }

        self.metrics.record_hit(raw.len() as u64);
        debug!(key = %key, elapsed_ms = timer.elapsed_ms(), "KV hit");
        Ok(Some(envelope.payload))
    }

    async fn put(&self, key: &CacheKey, payload: Bytes, ttl: Duration) -> Result<()> {
        self.ensure_connected()?;

        let encoded = Envelope::new(payload, self.config.effective_ttl(ttl))
            .encode(self.config.compression)?;
        if encoded.len() > self.config.max_value_size {
            debug!(
                key = %key,
                size = encoded.len(),
                limit = self.config.max_value_size,
                "Value exceeds KV size limit, not stored"
            );
            self.metrics.record_oversize();
            return Ok(());
        }

        let size = encoded.len() as u64;
        match self.store.put(key.digest(), encoded).await {
            Ok(_) => {
                self.metrics.record_put(size);
                Ok(())
            }
            Err(e) => {
                self.metrics.record_put_failure();
                Err(Error::tier(self.id.as_str(), e))
            }
        }
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.ensure_connected()?;
        self.store
            .purge(key.digest())
            .await
            .map_err(|e| Error::tier(self.id.as_str(), e))
    }
}
