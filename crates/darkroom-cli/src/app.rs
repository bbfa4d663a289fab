//! Composition root.

use crate::config::{DarkroomConfig, StoreConfig};
use darkroom_cache::{
    DurableTier, FilesystemObjectStore, MemoryTier, S3ObjectStore, TieredCache,
};
use darkroom_core::Result;
use darkroom_core::ports::{CacheTier, ObjectStore};
use darkroom_hash::ContentHasher;
use darkroom_models::{CdnSource, ModelArtifactCache, ModelLoader, ModelProvider, ObjectStoreSource};
use darkroom_nats::NatsKvTier;
use darkroom_pipeline::{MemoryGovernor, TransformPipeline, TransformRegistry};
use std::sync::Arc;
use tracing::{info, warn};

/// Long-lived components built once at startup and shared by request handlers.
pub struct App {
    config: DarkroomConfig,
    hasher: ContentHasher,
    cache: TieredCache,
    models: Arc<ModelArtifactCache>,
    governor: Arc<MemoryGovernor>,
}

impl App {
    /// Connect every configured tier and source.
    ///
    /// An unreachable NATS server leaves the shared tier out rather than
    /// failing startup; a misconfigured durable store is an error.
    pub async fn build(config: DarkroomConfig) -> Result<Self> {
        let hasher = ContentHasher::new(config.hasher.clone());

        let memory = Arc::new(MemoryTier::new(config.cache.memory.clone())?);
        let mut tiers: Vec<Arc<dyn CacheTier>> = vec![memory.clone()];

        if let Some(nats) = &config.cache.nats {
            match NatsKvTier::connect(nats.clone()).await {
                Ok(tier) => tiers.push(Arc::new(tier)),
                Err(e) => warn!(error = %e, "Shared cache unavailable, continuing without it"),
            }
        }

        let durable_store = match &config.cache.durable {
            Some(section) => {
                let store = open_store(&section.store).await?;
                tiers.push(Arc::new(DurableTier::new(
                    Arc::clone(&store),
                    section.tier.clone(),
                )));
                Some(store)
            }
            None => None,
        };

        let tiered = config.cache.tiered.clone().capped_at(config.pipeline.result_ttl());
        let cache = TieredCache::new(tiers, tiered);
        info!(tiers = ?cache.tier_ids(), "Cache tiers ready");

        let mut models = ModelArtifactCache::new(config.models.clone());
        if let Some(cdn) = &config.models.cdn {
            models = models.with_cdn(Arc::new(CdnSource::new(cdn.clone())?));
        }
        if let Some(store) = durable_store {
            models = models.with_durable(Arc::new(ObjectStoreSource::new(
                store,
                config.models.durable_prefix.clone(),
            )));
        }

        let governor = Arc::new(MemoryGovernor::new(config.pipeline.governor.clone()));
        governor.register(memory);

        Ok(Self {
            config,
            hasher,
            cache,
            models: Arc::new(models),
            governor,
        })
    }

    pub fn config(&self) -> &DarkroomConfig {
        &self.config
    }

    pub fn hasher(&self) -> &ContentHasher {
        &self.hasher
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn models(&self) -> &Arc<ModelArtifactCache> {
        &self.models
    }

    pub fn governor(&self) -> &Arc<MemoryGovernor> {
        &self.governor
    }

    /// Pipeline over this app's cache and governor with the given transforms.
    pub fn pipeline(&self, registry: TransformRegistry) -> TransformPipeline {
        TransformPipeline::new(
            self.config.pipeline.clone(),
            self.hasher.clone(),
            self.cache.clone(),
            registry,
            Arc::clone(&self.governor),
        )
    }

    /// Model provider whose idle models are unloaded under memory pressure.
    pub fn model_provider<L: ModelLoader>(&self, loader: L) -> Arc<ModelProvider<L>> {
        let provider = Arc::new(ModelProvider::new(Arc::clone(&self.models), loader));
        self.governor.register(provider.clone());
        provider
    }
}

async fn open_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config {
        StoreConfig::Filesystem { root } => Arc::new(FilesystemObjectStore::new(root)),
        StoreConfig::S3(s3) => Arc::new(S3ObjectStore::connect(s3).await?),
    };
    Ok(store)
}
