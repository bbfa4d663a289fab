//! Pipeline assembly and polling helpers.

use crate::fixtures::{InstrumentedTier, StubTransform};
use darkroom_cache::{TieredCache, TieredCacheConfig};
use darkroom_core::ports::{CacheTier, TierKind};
use darkroom_core::{EffectKind, StageKind};
use darkroom_hash::ContentHasher;
use darkroom_pipeline::{
    GovernorConfig, MemoryGovernor, PipelineConfig, TransformPipeline, TransformRegistry,
};
use std::sync::Arc;
use std::time::Duration;

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_for<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// A pipeline over an in-process tier and a shared tier, with stub transforms
/// for background removal and four effects.
pub struct Harness {
    pub pipeline: TransformPipeline,
    pub memory: Arc<InstrumentedTier>,
    pub shared: Arc<InstrumentedTier>,
    pub bg: Arc<StubTransform>,
    pub filmbw: Arc<StubTransform>,
    pub halation: Arc<StubTransform>,
    pub dither: Arc<StubTransform>,
    pub posterize: Arc<StubTransform>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let memory = InstrumentedTier::new("memory", TierKind::InProcess);
        let shared = InstrumentedTier::new("shared", TierKind::SharedNetwork);
        let tiers: Vec<Arc<dyn CacheTier>> = vec![memory.clone(), shared.clone()];
        let cache = TieredCache::new(
            tiers,
            TieredCacheConfig::default().capped_at(config.result_ttl()),
        );

        let bg = StubTransform::new("bg");
        let filmbw = StubTransform::new("filmbw");
        let halation = StubTransform::new("halation");
        let dither = StubTransform::new("dither");
        let posterize = StubTransform::new("posterize");
        let registry = TransformRegistry::new()
            .with(StageKind::BackgroundRemoval, bg.clone())
            .with(StageKind::Effect(EffectKind::FilmBw), filmbw.clone())
            .with(StageKind::Effect(EffectKind::Halation), halation.clone())
            .with(StageKind::Effect(EffectKind::Dither), dither.clone())
            .with(StageKind::Effect(EffectKind::Posterize), posterize.clone());

        let pipeline = TransformPipeline::new(
            config,
            ContentHasher::default(),
            cache,
            registry,
            Arc::new(MemoryGovernor::new(GovernorConfig::default())),
        );

        Self {
            pipeline,
            memory,
            shared,
            bg,
            filmbw,
            halation,
            dither,
            posterize,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
