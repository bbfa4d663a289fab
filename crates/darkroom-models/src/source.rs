//! Remote sources for model artifacts.

use crate::config::ModelSpec;
use async_trait::async_trait;
use bytes::Bytes;
use darkroom_core::ports::{ObjectMetadata, ObjectStore};
use darkroom_core::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A place model artifacts can be downloaded from and published to.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    fn name(&self) -> &str;

    /// Download `spec` into `staging`.
    ///
    /// Returns `Ok(false)` when the source does not have the artifact. Any
    /// existing content of `staging` may be reused or replaced.
    async fn fetch(&self, spec: &ModelSpec, staging: &Path) -> Result<bool>;

    /// Upload the verified artifact at `path`.
    async fn publish(&self, spec: &ModelSpec, path: &Path) -> Result<()>;
}

/// Artifacts stored at `<prefix>/<model_id>/<file_name>` in an object store.
pub struct ObjectStoreSource {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreSource {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn object_path(&self, spec: &ModelSpec) -> String {
        format!(
            "{}/{}/{}",
            self.prefix.trim_end_matches('/'),
            spec.id,
            spec.file_name
        )
    }
}

#[async_trait]
impl ArtifactSource for ObjectStoreSource {
    fn name(&self) -> &str {
        "durable"
    }

    async fn fetch(&self, spec: &ModelSpec, staging: &Path) -> Result<bool> {
        let path = self.object_path(spec);
        let Some(object) = self.store.get_object(&path).await? else {
            debug!(model = %spec.id, path = %path, "Model not in object store");
            return Ok(false);
        };

        tokio::fs::write(staging, &object.body)
            .await
            .map_err(|e| Error::Internal(format!("Failed to write model: {}", e)))?;
        Ok(true)
    }

    async fn publish(&self, spec: &ModelSpec, path: &Path) -> Result<()> {
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Internal(format!("Failed to read model: {}", e)))?;
        self.store
            .put_object(
                &self.object_path(spec),
                Bytes::from(body),
                ObjectMetadata::default().with_content_type("application/octet-stream"),
            )
            .await
    }
}
