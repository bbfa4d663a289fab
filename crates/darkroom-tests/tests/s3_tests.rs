//! Durable tier over S3-compatible storage.
//!
//! Run with: `cargo test -p darkroom-tests --test s3_tests --features integration`

#![cfg(feature = "integration")]

use bytes::Bytes;
use darkroom_cache::{DurableTier, DurableTierConfig};
use darkroom_core::ports::{CacheTier, ObjectMetadata, ObjectStore};
use darkroom_core::{CacheKey, ContentFingerprint, StageKind, StageParams};
use darkroom_tests::TestContext;
use std::sync::Arc;
use std::time::Duration;

fn key() -> CacheKey {
    let fingerprint: ContentFingerprint = "cd".repeat(32).parse().unwrap();
    CacheKey::new(&StageKind::BackgroundRemoval, "1", &fingerprint, &StageParams::new())
}

#[tokio::test]
async fn test_object_store_round_trip() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let store = ctx.s3_store("darkroom-objects").await.unwrap();

    assert!(store.get_object("missing/object.bin").await.unwrap().is_none());

    let metadata = ObjectMetadata::default()
        .with_content_type("image/png")
        .with_attribute("stage", "bg-removal");
    store
        .put_object("a/b.png", Bytes::from_static(b"png bytes"), metadata)
        .await
        .unwrap();

    let object = store.get_object("a/b.png").await.unwrap().unwrap();
    assert_eq!(object.body, Bytes::from_static(b"png bytes"));
    assert_eq!(object.metadata.content_type.as_deref(), Some("image/png"));
    assert_eq!(
        object.metadata.attributes.get("stage").map(String::as_str),
        Some("bg-removal")
    );

    store.delete_object("a/b.png").await.unwrap();
    store.delete_object("a/b.png").await.unwrap();
    assert!(store.get_object("a/b.png").await.unwrap().is_none());
}

#[tokio::test]
async fn test_durable_tier_over_s3() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let store: Arc<dyn ObjectStore> = Arc::new(ctx.s3_store("darkroom-durable").await.unwrap());
    let tier = DurableTier::new(store, DurableTierConfig::default());

    tier.put(&key(), Bytes::from_static(b"cutout"), Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(
        tier.get(&key()).await.unwrap(),
        Some(Bytes::from_static(b"cutout"))
    );

    tier.delete(&key()).await.unwrap();
    assert!(tier.get(&key()).await.unwrap().is_none());
}
