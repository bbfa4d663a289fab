//! Configuration for the JetStream KV tier.

use darkroom_cache::CompressionType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// KV bucket storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvStorage {
    #[default]
    File,
    Memory,
}

/// Configuration for [`NatsKvTier`](crate::NatsKvTier).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsKvConfig {
    /// NATS server URLs (joined with commas for a cluster).
    #[serde(default = "default_urls")]
    pub urls: Vec<String>,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Native TTL ceiling for every value in the bucket.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Values whose encoded size exceeds this are not stored.
    #[serde(default = "default_max_value_size")]
    pub max_value_size: usize,

    #[serde(default)]
    pub storage: KvStorage,

    #[serde(default = "default_compression")]
    pub compression: CompressionType,

    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_urls() -> Vec<String> {
    vec!["nats://localhost:4222".to_string()]
}

fn default_bucket() -> String {
    "DARKROOM_OUTPUTS".to_string()
}

fn default_max_age_secs() -> u64 {
    86400 * 7
}

fn default_max_value_size() -> usize {
    8 * 1024 * 1024
}

fn default_compression() -> CompressionType {
    CompressionType::Zstd
}

fn default_connection_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    5
}

impl Default for NatsKvConfig {
    fn default() -> Self {
        Self {
            urls: default_urls(),
            bucket: default_bucket(),
            max_age_secs: default_max_age_secs(),
            max_value_size: default_max_value_size(),
            storage: KvStorage::default(),
            compression: default_compression(),
            connection_timeout_secs: default_connection_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl NatsKvConfig {
    /// Create a new config with a single URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age_secs = max_age.as_secs();
        self
    }

    pub fn with_max_value_size(mut self, bytes: usize) -> Self {
        self.max_value_size = bytes;
        self
    }

    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// TTL actually applied to a put: the requested TTL capped by the bucket age.
    pub fn effective_ttl(&self, requested: Duration) -> Duration {
        if requested.is_zero() {
            self.max_age()
        } else {
            requested.min(self.max_age())
        }
    }
}
