//! Local, CDN and durable resolution of model artifacts.

use crate::config::{ModelCacheConfig, ModelSpec};
use crate::source::ArtifactSource;
use darkroom_core::{Error, Result};
use darkroom_trace::model_span;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{Instrument, Span, debug, info, warn};

/// Ensures a model file is present locally, in order: local cache, CDN, durable store.
///
/// A durable hit is republished to the CDN in the background.
pub struct ModelArtifactCache {
    config: ModelCacheConfig,
    specs: HashMap<String, ModelSpec>,
    cdn: Option<Arc<dyn ArtifactSource>>,
    durable: Option<Arc<dyn ArtifactSource>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ModelArtifactCache {
    pub fn new(config: ModelCacheConfig) -> Self {
        let specs = config
            .models
            .iter()
            .map(|spec| (spec.id.clone(), spec.clone()))
            .collect();
        Self {
            config,
            specs,
            cdn: None,
            durable: None,
            locks: DashMap::new(),
        }
    }

    pub fn with_cdn(mut self, source: Arc<dyn ArtifactSource>) -> Self {
        self.cdn = Some(source);
        self
    }

    pub fn with_durable(mut self, source: Arc<dyn ArtifactSource>) -> Self {
        self.durable = Some(source);
        self
    }

    pub fn spec(&self, model_id: &str) -> Option<&ModelSpec> {
        self.specs.get(model_id)
    }

    pub fn local_path(&self, spec: &ModelSpec) -> PathBuf {
        self.config.cache_dir.join(&spec.file_name)
    }

    /// Return a local path to a verified copy of `model_id`.
    pub async fn resolve(&self, model_id: &str) -> Result<PathBuf> {
        let span = model_span(model_id);
        self.resolve_in(model_id, &span).instrument(span.clone()).await
    }

    async fn resolve_in(&self, model_id: &str, span: &Span) -> Result<PathBuf> {
        let spec = self
            .specs
            .get(model_id)
            .ok_or_else(|| Error::ModelUnavailable {
                model_id: model_id.to_string(),
                attempts: vec!["registry: unknown model".to_string()],
            })?;

        let lock = self
            .locks
            .entry(model_id.to_string())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let target = self.local_path(spec);
        let mut attempts = Vec::new();

        match self.check_local(spec, &target).await {
            Ok(()) => {
                debug!(model = %spec.id, path = %target.display(), "Model found in local cache");
                span.record("darkroom.model.source", "local");
                return Ok(target);
            }
            Err(reason) => attempts.push(format!("local: {}", reason)),
        }

        tokio::fs::create_dir_all(&self.config.cache_dir)
            .await
            .map_err(|e| Error::Internal(format!("Failed to create model dir: {}", e)))?;

        if let Some(cdn) = &self.cdn {
            match self.fetch_from(cdn.as_ref(), spec, &target).await {
                Ok(()) => {
                    span.record("darkroom.model.source", cdn.name());
                    return Ok(target);
                }
                Err(reason) => attempts.push(format!("{}: {}", cdn.name(), reason)),
            }
        }

        if let Some(durable) = &self.durable {
            match self.fetch_from(durable.as_ref(), spec, &target).await {
                Ok(()) => {
                    span.record("darkroom.model.source", durable.name());
                    self.spawn_republish(spec, &target);
                    return Ok(target);
                }
                Err(reason) => attempts.push(format!("{}: {}", durable.name(), reason)),
            }
        }

        warn!(model = %spec.id, attempts = ?attempts, "Model unavailable from every source");
        Err(Error::ModelUnavailable {
            model_id: spec.id.clone(),
            attempts,
        })
    }

    async fn check_local(&self, spec: &ModelSpec, path: &Path) -> std::result::Result<(), String> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|_| "not present".to_string())?;

        if !spec.size_acceptable(meta.len()) {
            return Err(format!(
                "size {} differs from expected {} by more than {}",
                meta.len(),
                spec.expected_size,
                spec.size_tolerance
            ));
        }

        let age = meta
            .modified()
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .unwrap_or_default();
        if age >= self.config.max_age() {
            return Err(format!("stale ({}s old)", age.as_secs()));
        }
        Ok(())
    }

    /// Fetch into `<target>.part`, verify, then rename into place.
    async fn fetch_from(
        &self,
        source: &dyn ArtifactSource,
        spec: &ModelSpec,
        target: &Path,
    ) -> std::result::Result<(), String> {
        let staging = staging_path(target);
        info!(model = %spec.id, source = source.name(), "Fetching model");

        let outcome = match source.fetch(spec, &staging).await {
            Ok(true) => verify(spec, &staging).await,
            Ok(false) => Err("not found".to_string()),
            Err(e) => Err(e.to_string()),
        };

        if let Err(reason) = outcome {
            let _ = tokio::fs::remove_file(&staging).await;
            debug!(model = %spec.id, source = source.name(), reason = %reason, "Fetch failed");
            return Err(reason);
        }

        tokio::fs::rename(&staging, target)
            .await
            .map_err(|e| format!("failed to commit download: {}", e))?;
        info!(model = %spec.id, source = source.name(), path = %target.display(), "Model cached");
        Ok(())
    }

    fn spawn_republish(&self, spec: &ModelSpec, path: &Path) {
        let Some(cdn) = self.cdn.clone() else {
            return;
        };
        let spec = spec.clone();
        let path = path.to_path_buf();
        tokio::spawn(async move {
            if let Err(e) = cdn.publish(&spec, &path).await {
                warn!(model = %spec.id, error = %e, "Failed to republish model to CDN");
            }
        });
    }
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

async fn verify(spec: &ModelSpec, path: &Path) -> std::result::Result<(), String> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| format!("download missing: {}", e))?;
    if !spec.size_acceptable(meta.len()) {
        return Err(format!(
            "downloaded size {} outside tolerance of expected {}",
            meta.len(),
            spec.expected_size
        ));
    }

    if let Some(expected) = &spec.sha256 {
        let actual = sha256_file(path)
            .await
            .map_err(|e| format!("failed to hash download: {}", e))?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(format!("checksum mismatch: expected {}, got {}", expected, actual));
        }
    }
    Ok(())
}

async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source that serves fixed bytes (or nothing) and counts calls.
    struct FixedSource {
        name: &'static str,
        body: Option<Vec<u8>>,
        fetches: AtomicUsize,
        published: AtomicUsize,
    }

    impl FixedSource {
        fn new(name: &'static str, body: Option<Vec<u8>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                body,
                fetches: AtomicUsize::new(0),
                published: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ArtifactSource for FixedSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, _spec: &ModelSpec, staging: &Path) -> Result<bool> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            match &self.body {
                Some(body) => {
                    tokio::fs::write(staging, body).await?;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn publish(&self, _spec: &ModelSpec, _path: &Path) -> Result<()> {
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(dir: &tempfile::TempDir, spec: ModelSpec) -> ModelCacheConfig {
        ModelCacheConfig::new(dir.path()).with_model(spec)
    }

    #[tokio::test]
    async fn test_unknown_model() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelArtifactCache::new(ModelCacheConfig::new(dir.path()));
        assert!(matches!(
            cache.resolve("nope").await,
            Err(Error::ModelUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_trusted_local_copy_skips_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bg.onnx"), vec![0u8; 100]).unwrap();
        let cdn = FixedSource::new("cdn", Some(vec![1u8; 100]));
        let cache = ModelArtifactCache::new(config(&dir, ModelSpec::new("bg", "bg.onnx", 100)))
            .with_cdn(cdn.clone());

        let path = cache.resolve("bg").await.unwrap();
        assert_eq!(path, dir.path().join("bg.onnx"));
        assert_eq!(cdn.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_local_size_mismatch_refetches() {
        let dir = tempfile::tempdir().unwrap();
        let expected = 3 * 1024 * 1024;
        std::fs::write(dir.path().join("bg.onnx"), vec![0u8; 1024]).unwrap();
        let cdn = FixedSource::new("cdn", Some(vec![1u8; expected as usize]));
        let cache =
            ModelArtifactCache::new(config(&dir, ModelSpec::new("bg", "bg.onnx", expected)))
                .with_cdn(cdn.clone());

        let path = cache.resolve("bg").await.unwrap();
        assert_eq!(cdn.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), expected);
        assert!(!staging_path(&path).exists());
    }

    #[tokio::test]
    async fn test_durable_fallback_republishes() {
        let dir = tempfile::tempdir().unwrap();
        let cdn = FixedSource::new("cdn", None);
        let durable = FixedSource::new("durable", Some(vec![7u8; 10]));
        let cache = ModelArtifactCache::new(config(&dir, ModelSpec::new("bg", "bg.onnx", 10)))
            .with_cdn(cdn.clone())
            .with_durable(durable.clone());

        cache.resolve("bg").await.unwrap();
        assert_eq!(durable.fetches.load(Ordering::SeqCst), 1);

        for _ in 0..100 {
            if cdn.published.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("model was not republished");
    }

    #[tokio::test]
    async fn test_checksum_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ModelSpec::new("bg", "bg.onnx", 4).with_sha256("00".repeat(32));
        let cdn = FixedSource::new("cdn", Some(b"abcd".to_vec()));
        let cache = ModelArtifactCache::new(config(&dir, spec)).with_cdn(cdn);

        let err = cache.resolve("bg").await.unwrap_err();
        let Error::ModelUnavailable { attempts, .. } = err else {
            panic!("expected ModelUnavailable");
        };
        assert!(attempts.iter().any(|a| a.contains("checksum mismatch")));
        assert!(!dir.path().join("bg.onnx").exists());
        assert!(!dir.path().join("bg.onnx.part").exists());
    }

    #[tokio::test]
    async fn test_checksum_match_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let digest = hex::encode(Sha256::digest(b"abcd"));
        let spec = ModelSpec::new("bg", "bg.onnx", 4).with_sha256(digest);
        let cache = ModelArtifactCache::new(config(&dir, spec))
            .with_cdn(FixedSource::new("cdn", Some(b"abcd".to_vec())));
        assert!(cache.resolve("bg").await.is_ok());
    }

    #[tokio::test]
    async fn test_all_sources_fail() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelArtifactCache::new(config(&dir, ModelSpec::new("bg", "bg.onnx", 10)))
            .with_cdn(FixedSource::new("cdn", None))
            .with_durable(FixedSource::new("durable", None));

        let Err(Error::ModelUnavailable { model_id, attempts }) = cache.resolve("bg").await else {
            panic!("expected ModelUnavailable");
        };
        assert_eq!(model_id, "bg");
        assert_eq!(attempts.len(), 3);
        assert!(attempts[0].starts_with("local"));
        assert!(attempts[1].starts_with("cdn"));
        assert!(attempts[2].starts_with("durable"));
    }
}
