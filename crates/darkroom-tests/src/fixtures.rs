//! Test doubles and sample inputs.

use async_trait::async_trait;
use bytes::Bytes;
use darkroom_cache::{MemoryTier, MemoryTierConfig};
use darkroom_core::events::ProgressEvent;
use darkroom_core::ports::{CacheTier, ProgressSink, TierKind, Transform};
use darkroom_core::{CacheKey, Error, Result, StageParams, TierId};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Deterministic RGB gradient; `seed` shifts the blue channel.
pub fn gradient(width: u32, height: u32, seed: u8) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, seed.wrapping_add(((x ^ y) % 7) as u8)])
    })
}

pub fn encode(image: &RgbImage, format: ImageFormat) -> Bytes {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut buf, format)
        .expect("encoding a synthetic image");
    Bytes::from(buf.into_inner())
}

pub fn png(width: u32, height: u32, seed: u8) -> Bytes {
    encode(&gradient(width, height, seed), ImageFormat::Png)
}

/// Transform that tags its input, counts calls and can be told to fail.
pub struct StubTransform {
    tag: String,
    version: String,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Mutex<Duration>,
}

impl StubTransform {
    pub fn new(tag: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            tag: tag.into(),
            version: "1".to_string(),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn failing(tag: impl Into<String>) -> Arc<Self> {
        let transform = Self::new(tag);
        transform.set_failing(true);
        transform
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transform for StubTransform {
    fn version(&self) -> &str {
        &self.version
    }

    async fn compute(&self, input: Bytes, params: &StageParams) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Internal(format!("{} failed", self.tag)));
        }

        let mut out = format!("{}|{}|{}|", self.tag, params.fingerprint(), input.len()).into_bytes();
        out.extend_from_slice(&input[..input.len().min(64)]);
        Ok(Bytes::from(out))
    }
}

/// A memory tier under a chosen id that counts calls and can be made to fail.
pub struct InstrumentedTier {
    id: TierId,
    kind: TierKind,
    inner: MemoryTier,
    gets: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    failing: AtomicBool,
}

impl InstrumentedTier {
    pub fn new(id: &str, kind: TierKind) -> Arc<Self> {
        Arc::new(Self {
            id: TierId::new(id),
            kind,
            inner: MemoryTier::new(MemoryTierConfig::default()).expect("default memory tier"),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::tier(self.id.as_str(), "simulated outage"));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheTier for InstrumentedTier {
    fn id(&self) -> &TierId {
        &self.id
    }

    fn kind(&self) -> TierKind {
        self.kind
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &CacheKey, payload: Bytes, ttl: Duration) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.put(key, payload, ttl).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.delete(key).await
    }
}

/// Progress sink that keeps every delivered event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
    disconnected: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn has_terminal(&self) -> bool {
        self.events.lock().iter().any(ProgressEvent::is_terminal)
    }

    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }

    async fn deliver(&self, event: ProgressEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}
