//! Durable tier over an [`ObjectStore`].

use crate::envelope::ContentKind;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use darkroom_core::ports::{CacheTier, ObjectMetadata, ObjectStore, TierKind};
use darkroom_core::{CacheKey, Error, Result, TierId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const ATTR_CACHE_KEY: &str = "cache_key";
const ATTR_CREATED_AT: &str = "created_at";
const ATTR_TTL_SECS: &str = "ttl_secs";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableTierConfig {
    /// Path prefix under which stage outputs are stored.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_namespace() -> String {
    "outputs".to_string()
}

fn default_extension() -> String {
    "png".to_string()
}

impl Default for DurableTierConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            extension: default_extension(),
        }
    }
}

impl DurableTierConfig {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

/// Object-store-backed tier with lazy expiry.
///
/// Expiry is checked on read against the `created_at` and `ttl_secs` metadata;
/// expired objects are removed in the background and reported as a miss.
pub struct DurableTier {
    id: TierId,
    store: Arc<dyn ObjectStore>,
    config: DurableTierConfig,
}

impl DurableTier {
    pub fn new(store: Arc<dyn ObjectStore>, config: DurableTierConfig) -> Self {
        Self {
            id: TierId::new(format!("durable:{}", store.name())),
            store,
            config,
        }
    }

    fn path(&self, key: &CacheKey) -> String {
        key.object_path(&self.config.namespace, &self.config.extension)
    }
}

/// `Some(expired)` when the metadata is readable, `None` otherwise.
fn check_expiry(metadata: &ObjectMetadata, now: DateTime<Utc>) -> Option<bool> {
    let created_at = DateTime::parse_from_rfc3339(metadata.attribute(ATTR_CREATED_AT)?)
        .ok()?
        .with_timezone(&Utc);
    let ttl_secs: u64 = metadata.attribute(ATTR_TTL_SECS)?.parse().ok()?;
    if ttl_secs == 0 {
        return Some(false);
    }
    // A deadline past the representable range never expires.
    let expires_at = i64::try_from(ttl_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| created_at.checked_add_signed(ttl));
    Some(expires_at.is_some_and(|at| at <= now))
}

#[async_trait]
impl CacheTier for DurableTier {
    fn id(&self) -> &TierId {
        &self.id
    }

    fn kind(&self) -> TierKind {
        TierKind::DurableObjectStore
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let path = self.path(key);
        let Some(object) = self
            .store
            .get_object(&path)
            .await
            .map_err(|e| Error::tier(self.id.as_str(), e))?
        else {
            return Ok(None);
        };

        match check_expiry(&object.metadata, Utc::now()) {
            Some(false) => Ok(Some(object.body)),
            Some(true) => {
                debug!(tier = %self.id, key = %key, "Durable entry expired");
                let store = Arc::clone(&self.store);
                tokio::spawn(async move {
                    if let Err(e) = store.delete_object(&path).await {
                        warn!(path = %path, error = %e, "Failed to delete expired object");
                    }
                });
                Ok(None)
            }
            None => {
                debug!(tier = %self.id, key = %key, "Durable entry has no usable metadata");
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &CacheKey, payload: Bytes, ttl: Duration) -> Result<()> {
        let metadata = ObjectMetadata::default()
            .with_content_type(ContentKind::sniff(&payload).mime_type())
            .with_attribute(ATTR_CACHE_KEY, key.digest())
            .with_attribute(ATTR_CREATED_AT, Utc::now().to_rfc3339())
            .with_attribute(ATTR_TTL_SECS, ttl.as_secs().to_string());

        self.store
            .put_object(&self.path(key), payload, metadata)
            .await
            .map_err(|e| Error::tier(self.id.as_str(), e))
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.store
            .delete_object(&self.path(key))
            .await
            .map_err(|e| Error::tier(self.id.as_str(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FilesystemObjectStore;
    use darkroom_core::{ContentFingerprint, StageKind, StageParams};

    fn key() -> CacheKey {
        CacheKey::new(
            &StageKind::BackgroundRemoval,
            "1",
            &ContentFingerprint::from_digest(&[9; 32]),
            &StageParams::new(),
        )
    }

    fn tier(dir: &tempfile::TempDir) -> (DurableTier, Arc<FilesystemObjectStore>) {
        let store = Arc::new(FilesystemObjectStore::new(dir.path()));
        (
            DurableTier::new(store.clone(), DurableTierConfig::default()),
            store,
        )
    }

    #[tokio::test]
    async fn test_put_then_get_writes_layout() {
        let dir = tempfile::tempdir().unwrap();
        let (tier, store) = tier(&dir);

        tier.put(&key(), Bytes::from_static(b"output"), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(tier.get(&key()).await.unwrap().unwrap(), "output");

        let path = key().object_path("outputs", "png");
        let object = store.get_object(&path).await.unwrap().unwrap();
        assert_eq!(object.metadata.attribute(ATTR_CACHE_KEY), Some(key().digest().as_str()));
        assert_eq!(object.metadata.attribute(ATTR_TTL_SECS), Some("3600"));
        assert!(dir.path().join(&path).exists());
    }

    #[tokio::test]
    async fn test_expired_object_is_miss_and_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let (tier, store) = tier(&dir);
        let path = key().object_path("outputs", "png");

        let stale = ObjectMetadata::default()
            .with_attribute(ATTR_CREATED_AT, (Utc::now() - chrono::Duration::hours(2)).to_rfc3339())
            .with_attribute(ATTR_TTL_SECS, "60");
        store
            .put_object(&path, Bytes::from_static(b"old"), stale)
            .await
            .unwrap();

        assert!(tier.get(&key()).await.unwrap().is_none());

        for _ in 0..50 {
            if store.get_object(&path).await.unwrap().is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expired object was not deleted");
    }

    #[tokio::test]
    async fn test_unparseable_metadata_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let (tier, store) = tier(&dir);
        store
            .put_object(
                &key().object_path("outputs", "png"),
                Bytes::from_static(b"x"),
                ObjectMetadata::default().with_attribute(ATTR_CREATED_AT, "yesterday"),
            )
            .await
            .unwrap();
        assert!(tier.get(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let dir = tempfile::tempdir().unwrap();
        let (tier, _) = tier(&dir);
        tier.put(&key(), Bytes::from_static(b"keep"), Duration::ZERO)
            .await
            .unwrap();
        assert!(tier.get(&key()).await.unwrap().is_some());

        tier.delete(&key()).await.unwrap();
        assert!(tier.get(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_huge_ttl_never_expires() {
        let dir = tempfile::tempdir().unwrap();
        let (tier, _) = tier(&dir);

        for (seed, ttl) in [(1u8, 10_000_000_000_000u64), (2, u64::MAX)] {
            let key = CacheKey::new(
                &StageKind::BackgroundRemoval,
                "1",
                &ContentFingerprint::from_digest(&[seed; 32]),
                &StageParams::new(),
            );
            tier.put(&key, Bytes::from_static(b"long"), Duration::from_secs(ttl))
                .await
                .unwrap();
            assert_eq!(tier.get(&key).await.unwrap().unwrap(), "long");
        }
    }
}
