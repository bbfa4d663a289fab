//! Tier routing, backfill and circuit breaking across instrumented tiers.

use bytes::Bytes;
use darkroom_cache::{BreakerConfig, BreakerState, TieredCache, TieredCacheConfig};
use darkroom_core::ports::{CacheTier, TierKind};
use darkroom_core::{CacheKey, ContentFingerprint, EffectKind, StageKind, StageParams, StageSpec};
use darkroom_tests::{Harness, InstrumentedTier, png, wait_for};
use std::sync::Arc;
use std::time::Duration;

fn key(seed: u8) -> CacheKey {
    let fingerprint: ContentFingerprint = format!("{:02x}", seed).repeat(32).parse().unwrap();
    CacheKey::new(
        &StageKind::Effect(EffectKind::FilmBw),
        "1",
        &fingerprint,
        &StageParams::new(),
    )
}

fn cache(tiers: &[Arc<InstrumentedTier>], cooldown_secs: u64) -> TieredCache {
    let tiers: Vec<Arc<dyn CacheTier>> = tiers.iter().map(|t| t.clone() as Arc<dyn CacheTier>).collect();
    TieredCache::new(
        tiers,
        TieredCacheConfig {
            breaker: BreakerConfig {
                failure_threshold: 5,
                cooldown_secs,
            },
            ..TieredCacheConfig::default()
        },
    )
}

#[tokio::test]
async fn test_slow_tier_hit_backfills_fast_tier() {
    let memory = InstrumentedTier::new("memory", TierKind::InProcess);
    let durable = InstrumentedTier::new("durable", TierKind::DurableObjectStore);
    durable
        .put(&key(1), Bytes::from_static(b"stored"), Duration::from_secs(60))
        .await
        .unwrap();
    let cache = cache(&[memory.clone(), durable.clone()], 60);

    let hit = cache.get(&key(1)).await.unwrap();
    assert_eq!(hit.tier.as_str(), "durable");
    assert!(wait_for(|| memory.len() == 1, Duration::from_secs(1)).await);

    let hit = cache.get(&key(1)).await.unwrap();
    assert_eq!(hit.tier.as_str(), "memory");
    assert_eq!(hit.payload, Bytes::from_static(b"stored"));
}

#[tokio::test]
async fn test_open_breaker_stops_routing_to_tier() {
    let shared = InstrumentedTier::new("shared", TierKind::SharedNetwork);
    let durable = InstrumentedTier::new("durable", TierKind::DurableObjectStore);
    shared.set_failing(true);
    let cache = cache(&[shared.clone(), durable.clone()], 60);

    for _ in 0..5 {
        assert!(cache.get(&key(2)).await.is_none());
    }
    assert_eq!(shared.gets(), 5);
    assert_eq!(cache.health()[0].state, BreakerState::Open);

    assert!(cache.get(&key(2)).await.is_none());
    assert_eq!(shared.gets(), 5);
    assert_eq!(durable.gets(), 6);

    let report = cache
        .put(&key(2), Bytes::from_static(b"x"), Duration::from_secs(60))
        .await;
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.stored.len(), 1);
    assert_eq!(shared.puts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_admits_trial_after_cooldown() {
    let shared = InstrumentedTier::new("shared", TierKind::SharedNetwork);
    shared.set_failing(true);
    let cache = cache(&[shared.clone()], 30);

    for _ in 0..5 {
        cache.get(&key(3)).await;
    }
    assert_eq!(cache.health()[0].state, BreakerState::Open);
    assert!(cache.health()[0].retry_in_ms.is_some());

    tokio::time::advance(Duration::from_secs(10)).await;
    cache.get(&key(3)).await;
    assert_eq!(shared.gets(), 5);

    shared.set_failing(false);
    tokio::time::advance(Duration::from_secs(21)).await;
    cache.get(&key(3)).await;
    assert_eq!(shared.gets(), 6);
    assert_eq!(cache.health()[0].state, BreakerState::Closed);
    assert_eq!(cache.health()[0].consecutive_failures, 0);
}

#[tokio::test]
async fn test_session_survives_shared_tier_outage() {
    let harness = Harness::new();
    harness.shared.set_failing(true);
    let photo = png(32, 32, 8);
    let stages = vec![
        StageSpec::background_removal(),
        StageSpec::effect(EffectKind::Halation, StageParams::new().with("radius", 2.5)),
    ];

    let first = harness
        .pipeline
        .process(photo.clone(), stages.clone(), None)
        .await
        .unwrap();
    assert!(first.success);
    assert_eq!(first.cache_info.hits, 0);
    assert!(harness.shared.is_empty());

    let second = harness.pipeline.process(photo, stages, None).await.unwrap();
    assert_eq!(second.cache_info.hits, 2);
    assert_eq!(harness.memory.len(), 2);
}
