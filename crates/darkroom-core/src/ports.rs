//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the core domain and external adapters.

use crate::events::ProgressEvent;
use crate::fingerprint::StageParams;
use crate::ids::TierId;
use crate::key::CacheKey;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Where a cache tier sits on the speed/durability axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    InProcess,
    SharedNetwork,
    DurableObjectStore,
}

/// Byte-level cache storage.
///
/// Implementations must tolerate concurrent calls for the same key. Concurrent
/// `put`s of the same key may both succeed; the last writer wins.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Stable identifier, used for health tracking and logs.
    fn id(&self) -> &TierId;

    fn kind(&self) -> TierKind;

    /// `Ok(None)` is a miss. `Err` means the tier itself is unhealthy.
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>>;

    async fn put(&self, key: &CacheKey, payload: Bytes, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &CacheKey) -> Result<()>;
}

/// An expensive, deterministic image transformation.
#[async_trait]
pub trait Transform: Send + Sync {
    /// Implementation version. Changing it invalidates every cached output.
    fn version(&self) -> &str;

    /// Produce the stage output for `input`.
    async fn compute(&self, input: Bytes, params: &StageParams) -> Result<Bytes>;
}

/// Metadata stored alongside an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ObjectMetadata {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// An object read back from an object store.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub metadata: ObjectMetadata,
}

/// Durable blob storage addressed by path (S3, local filesystem, ...).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// `Ok(None)` when the object does not exist.
    async fn get_object(&self, path: &str) -> Result<Option<StoredObject>>;

    async fn put_object(&self, path: &str, body: Bytes, metadata: ObjectMetadata) -> Result<()>;

    /// Deleting a missing object succeeds.
    async fn delete_object(&self, path: &str) -> Result<()>;
}

/// External consumer of progress events (websocket, message bus, ...).
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// A disconnected sink receives nothing.
    fn is_connected(&self) -> bool;

    async fn deliver(&self, event: ProgressEvent) -> Result<()>;
}

/// Something that can give memory back when asked.
pub trait Reclaimer: Send + Sync {
    fn name(&self) -> &str;

    /// Release what can be released; returns an estimate of bytes freed.
    fn reclaim(&self) -> Result<u64>;
}
