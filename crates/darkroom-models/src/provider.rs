//! Lazy, single-flight loading of model handles.

use crate::artifact::ModelArtifactCache;
use crate::config::ModelSpec;
use async_trait::async_trait;
use darkroom_core::ports::Reclaimer;
use darkroom_core::{Error, Result};
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Turns a resolved model file into something inference code can use.
#[async_trait]
pub trait ModelLoader: Send + Sync + 'static {
    type Model: Send + Sync + 'static;

    async fn load(&self, spec: &ModelSpec, path: &Path) -> Result<Self::Model>;
}

type Slot<M> = Arc<Mutex<Option<Arc<M>>>>;

/// Loads each model at most once; concurrent callers for the same model wait
/// for the first load and share its handle.
pub struct ModelProvider<L: ModelLoader> {
    artifacts: Arc<ModelArtifactCache>,
    loader: L,
    slots: DashMap<String, Slot<L::Model>>,
}

impl<L: ModelLoader> ModelProvider<L> {
    pub fn new(artifacts: Arc<ModelArtifactCache>, loader: L) -> Self {
        Self {
            artifacts,
            loader,
            slots: DashMap::new(),
        }
    }

    pub async fn load(&self, model_id: &str) -> Result<Arc<L::Model>> {
        let slot = self.slots.entry(model_id.to_string()).or_default().clone();
        let mut guard = slot.lock().await;
        if let Some(model) = guard.as_ref() {
            debug!(model = %model_id, "Model already loaded");
            return Ok(Arc::clone(model));
        }

        let path = self.artifacts.resolve(model_id).await?;
        let spec = self
            .artifacts
            .spec(model_id)
            .ok_or_else(|| Error::Internal(format!("model {} resolved without a spec", model_id)))?;

        let model = self
            .loader
            .load(spec, &path)
            .await
            .map(Arc::new)
            .map_err(|e| Error::ModelLoad {
                model_id: model_id.to_string(),
                message: e.to_string(),
            })?;

        info!(model = %model_id, path = %path.display(), "Model loaded");
        *guard = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Whether a handle is loaded. A load in progress reports `false`.
    pub fn is_ready(&self, model_id: &str) -> bool {
        self.slots
            .get(model_id)
            .and_then(|slot| slot.try_lock().ok().map(|guard| guard.is_some()))
            .unwrap_or(false)
    }

    /// Drop the provider's handle; callers holding an `Arc` keep theirs.
    pub fn unload(&self, model_id: &str) -> bool {
        let Some(slot) = self.slots.get(model_id).map(|s| Arc::clone(s.value())) else {
            return false;
        };
        match slot.try_lock() {
            Ok(mut guard) => guard.take().is_some(),
            Err(_) => false,
        }
    }
}

impl<L: ModelLoader> Reclaimer for ModelProvider<L> {
    fn name(&self) -> &str {
        "models"
    }

    /// Unloads models nobody else holds. Returns their registered sizes.
    fn reclaim(&self) -> Result<u64> {
        let mut freed = 0;
        for entry in self.slots.iter() {
            let Ok(mut guard) = entry.value().try_lock() else {
                continue;
            };
            let idle = guard.as_ref().is_some_and(|m| Arc::strong_count(m) == 1);
            if idle {
                guard.take();
                freed += self
                    .artifacts
                    .spec(entry.key())
                    .map(|s| s.expected_size)
                    .unwrap_or(0);
                info!(model = %entry.key(), "Idle model unloaded");
            }
        }
        Ok(freed)
    }
}
