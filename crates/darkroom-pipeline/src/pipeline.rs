//! Stage orchestration over the tiered cache.

use crate::config::PipelineConfig;
use crate::governor::MemoryGovernor;
use crate::progress::{ProgressReporter, SessionProgress};
use crate::registry::TransformRegistry;
use bytes::Bytes;
use darkroom_cache::TieredCache;
use darkroom_core::events::ProgressDetail;
use darkroom_core::ports::{ProgressSink, Transform};
use darkroom_core::{
    CacheKey, ComputeError, ComputeErrorKind, ContentFingerprint, Error, Result, Session,
    SessionId, StageOutcome, StageParams, StageRecord, StageSpec, TerminalState,
};
use darkroom_hash::{ContentHasher, Fingerprinted, HashMode};
use darkroom_trace::{session_span, stage_span};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{Instrument, Span, debug, info, warn};

/// Stage name carried by the final progress event of a session.
pub const SESSION_STAGE: &str = "session";

/// Result of one stage as returned to the caller.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: String,
    pub output: Option<Bytes>,
    pub error: Option<ComputeError>,
    pub cache_hit: bool,
    pub elapsed_ms: u64,
}

impl From<StageRecord> for StageReport {
    fn from(record: StageRecord) -> Self {
        let (output, error) = match record.outcome {
            Ok(bytes) => (Some(bytes), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            stage: record.stage,
            output,
            error,
            cache_hit: record.cache_hit,
            elapsed_ms: record.elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheInfo {
    /// Stages served from the cache.
    pub hits: u32,
    pub total: u32,
}

impl CacheInfo {
    pub fn hit_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.hits as f64 / self.total as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Timings {
    pub fingerprint_ms: u64,
    pub total_ms: u64,
}

/// Everything a caller gets back from [`TransformPipeline::process`].
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub session_id: SessionId,
    pub fingerprint: ContentFingerprint,
    pub hash_mode: HashMode,
    pub state: TerminalState,
    /// False only when every requested stage failed.
    pub success: bool,
    /// One entry per requested stage; background removal first, then effects in request order.
    pub results: Vec<StageReport>,
    pub cache_info: CacheInfo,
    pub timings: Timings,
}

impl ProcessOutcome {
    pub fn report(&self, stage: &str) -> Option<&StageReport> {
        self.results.iter().find(|r| r.stage == stage)
    }

    /// Output bytes of `stage`, or `None` if it failed or was not requested.
    pub fn output(&self, stage: &str) -> Option<&Bytes> {
        self.report(stage).and_then(|r| r.output.as_ref())
    }

    pub fn failed_stages(&self) -> impl Iterator<Item = &StageReport> {
        self.results.iter().filter(|r| r.error.is_some())
    }
}

struct Inner {
    config: PipelineConfig,
    hasher: ContentHasher,
    cache: TieredCache,
    registry: TransformRegistry,
    governor: Arc<MemoryGovernor>,
    progress: ProgressReporter,
    sessions: Semaphore,
}

/// Runs background removal and effect stages, serving each from the cache when
/// possible. Cheap to clone; clones share the cache, registry and session limit.
#[derive(Clone)]
pub struct TransformPipeline {
    inner: Arc<Inner>,
}

impl TransformPipeline {
    pub fn new(
        config: PipelineConfig,
        hasher: ContentHasher,
        cache: TieredCache,
        registry: TransformRegistry,
        governor: Arc<MemoryGovernor>,
    ) -> Self {
        let progress = ProgressReporter::new(config.progress_buffer);
        let sessions = Semaphore::new(config.max_concurrent_sessions.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                hasher,
                cache,
                registry,
                governor,
                progress,
                sessions,
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &TieredCache {
        &self.inner.cache
    }

    pub fn registry(&self) -> &TransformRegistry {
        &self.inner.registry
    }

    pub fn governor(&self) -> &Arc<MemoryGovernor> {
        &self.inner.governor
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.inner.progress
    }

    /// Reject requests that cannot be planned: no stages, a stage named twice,
    /// a kind without a registered transform, or non-finite parameters.
    pub fn validate(&self, stages: &[StageSpec]) -> Result<()> {
        if stages.is_empty() {
            return Err(Error::InvalidRequest(
                "at least one stage must be requested".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for spec in stages {
            let name = spec.name();
            if !seen.insert(name.clone()) {
                return Err(Error::InvalidRequest(format!(
                    "stage {} requested more than once",
                    name
                )));
            }
            self.inner.registry.require(&spec.kind)?;
            spec.params.validate()?;
        }
        Ok(())
    }

    /// Fingerprint `input`, run `stages` and aggregate the results.
    ///
    /// Only invalid requests and undecodable input fail the call; stage
    /// failures are reported per stage. Progress goes to `sink` when given.
    pub async fn process(
        &self,
        input: Bytes,
        stages: Vec<StageSpec>,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> Result<ProcessOutcome> {
        self.validate(&stages)?;

        let _permit = self
            .inner
            .sessions
            .acquire()
            .await
            .map_err(|_| Error::Internal("pipeline session limiter closed".to_string()))?;

        let session = Session::new();
        let span = session_span(&session.id.to_string(), stages.len(), input.len());
        self.process_session(session, input, &stages, sink, &span)
            .instrument(span.clone())
            .await
    }

    async fn process_session(
        &self,
        mut session: Session,
        input: Bytes,
        stages: &[StageSpec],
        sink: Option<Arc<dyn ProgressSink>>,
        span: &Span,
    ) -> Result<ProcessOutcome> {
        let started = Instant::now();
        let fingerprinted = self.fingerprint(input.clone()).await?;
        let fingerprint_ms = started.elapsed().as_millis() as u64;
        span.record("darkroom.fingerprint", fingerprinted.fingerprint.short());

        let progress = match sink {
            Some(sink) => self.inner.progress.register(session.id, sink),
            None => SessionProgress::detached(),
        };

        self.run(
            &mut session,
            input,
            &fingerprinted.fingerprint,
            stages,
            &progress,
        )
        .await;

        let state = session.finish();
        let cache_info = CacheInfo {
            hits: session
                .results
                .iter()
                .filter(|r| r.cache_hit && r.is_success())
                .count() as u32,
            total: session.results.len() as u32,
        };

        progress
            .emit(
                SESSION_STAGE,
                100,
                format!("{:?}", state),
                ProgressDetail::SessionCompleted {
                    state,
                    cache_hits: cache_info.hits,
                    stages: cache_info.total,
                },
            )
            .await;
        self.inner.progress.unregister(&session.id);

        let total_ms = started.elapsed().as_millis() as u64;
        info!(
            session = %session.id,
            state = ?state,
            hits = cache_info.hits,
            stages = cache_info.total,
            total_ms,
            "Session finished"
        );

        Ok(ProcessOutcome {
            session_id: session.id,
            fingerprint: fingerprinted.fingerprint,
            hash_mode: fingerprinted.mode,
            state,
            success: state.is_success(),
            results: session.results.into_iter().map(StageReport::from).collect(),
            cache_info,
            timings: Timings {
                fingerprint_ms,
                total_ms,
            },
        })
    }

    async fn fingerprint(&self, input: Bytes) -> Result<Fingerprinted> {
        let hasher = self.inner.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.fingerprint_with_outcome(&input))
            .await
            .map_err(|e| Error::Internal(format!("fingerprint task failed: {}", e)))?
    }

    /// Run validated `stages` for one input, recording every outcome in `session`.
    ///
    /// Background removal runs first. Effects take its output as input and
    /// chain their keys onto its key; without background removal they take
    /// `input` directly.
    pub async fn run(
        &self,
        session: &mut Session,
        input: Bytes,
        fingerprint: &ContentFingerprint,
        stages: &[StageSpec],
        progress: &SessionProgress,
    ) {
        let (background, effects): (Vec<&StageSpec>, Vec<&StageSpec>) = stages
            .iter()
            .partition(|spec| spec.kind.is_background_removal());

        let mut upstream = Upstream::Original(input.clone());
        if let Some(spec) = background.first() {
            session.begin_stage(spec.name());
            let record = match self.plan(spec, fingerprint, None) {
                Some((transform, key)) => {
                    let record = self
                        .execute(spec, transform, &key, Some(input.clone()), progress)
                        .await;
                    upstream = Upstream::Stage {
                        output: record.outcome.as_ref().ok().cloned(),
                        key,
                    };
                    record
                }
                None => {
                    upstream = Upstream::Unplanned;
                    self.not_registered(spec, progress).await
                }
            };
            session.record(record);
        }

        let heavy = self
            .inner
            .governor
            .config()
            .is_heavy(effects.len(), input.len());
        let parallel = self.inner.config.max_parallel_effects;

        if parallel > 1 && effects.len() > 1 {
            if heavy {
                self.relieve_memory().await;
            }
            let upstream = &upstream;
            let records: Vec<StageRecord> = stream::iter(effects.iter().map(|spec| {
                self.run_effect(spec, fingerprint, upstream, progress)
            }))
            .buffered(parallel)
            .collect()
            .await;
            for record in records {
                session.record(record);
            }
        } else {
            for (i, spec) in effects.iter().enumerate() {
                if heavy && i > 0 {
                    self.relieve_memory().await;
                }
                session.begin_stage(spec.name());
                let record = self.run_effect(spec, fingerprint, &upstream, progress).await;
                session.record(record);
            }
        }
    }

    async fn run_effect(
        &self,
        spec: &StageSpec,
        fingerprint: &ContentFingerprint,
        upstream: &Upstream,
        progress: &SessionProgress,
    ) -> StageRecord {
        let (parent, input) = match upstream {
            Upstream::Original(input) => (None, Some(input.clone())),
            Upstream::Stage { output, key } => (Some(key), output.clone()),
            Upstream::Unplanned => {
                let error = ComputeError::new(
                    spec.name(),
                    ComputeErrorKind::UpstreamFailed,
                    "background removal has no registered transform",
                );
                return self.fail_unplanned(spec, error, progress).await;
            }
        };

        match self.plan(spec, fingerprint, parent) {
            Some((transform, key)) => self.execute(spec, transform, &key, input, progress).await,
            None => self.not_registered(spec, progress).await,
        }
    }

    fn plan(
        &self,
        spec: &StageSpec,
        fingerprint: &ContentFingerprint,
        upstream: Option<&CacheKey>,
    ) -> Option<(Arc<dyn Transform>, CacheKey)> {
        let transform = self.inner.registry.get(&spec.kind)?;
        let mut key = CacheKey::new(&spec.kind, transform.version(), fingerprint, &spec.params);
        if let Some(upstream) = upstream {
            key = key.with_upstream(upstream);
        }
        Some((transform, key))
    }

    async fn execute(
        &self,
        spec: &StageSpec,
        transform: Arc<dyn Transform>,
        key: &CacheKey,
        input: Option<Bytes>,
        progress: &SessionProgress,
    ) -> StageRecord {
        let stage = spec.name();
        let started = Instant::now();
        progress
            .emit(&stage, 0, "started", ProgressDetail::StageStarted)
            .await;

        let span = stage_span(&stage, &key.digest());
        let deadline = self.inner.config.stage_timeout();
        let resolved = tokio::time::timeout(
            deadline,
            self.lookup_or_compute(&stage, transform, key, &spec.params, input),
        )
        .instrument(span.clone())
        .await;

        let (outcome, cache_hit) = match resolved {
            Ok(resolved) => resolved,
            Err(_) => {
                warn!(stage = %stage, "Stage deadline exceeded; computation continues in background");
                (
                    Err(ComputeError::timeout(&stage, deadline.as_millis() as u64)),
                    false,
                )
            }
        };
        span.record("darkroom.cache.hit", cache_hit);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(_) => {
                info!(stage = %stage, cache_hit, elapsed_ms, "Stage completed");
                let message = if cache_hit { "cache hit" } else { "computed" };
                progress
                    .emit(
                        &stage,
                        100,
                        message,
                        ProgressDetail::StageCompleted {
                            cache_hit,
                            elapsed_ms,
                        },
                    )
                    .await;
            }
            Err(e) => {
                warn!(stage = %stage, kind = ?e.kind, error = %e.message, elapsed_ms, "Stage failed");
                self.emit_failure(&stage, e, elapsed_ms, progress).await;
            }
        }

        StageRecord {
            stage,
            outcome,
            cache_hit,
            elapsed_ms,
        }
    }

    /// Serve `key` from the cache or compute it.
    ///
    /// Computation runs on its own task which also stores the result, so it
    /// completes and is cached even if this future is dropped.
    async fn lookup_or_compute(
        &self,
        stage: &str,
        transform: Arc<dyn Transform>,
        key: &CacheKey,
        params: &StageParams,
        input: Option<Bytes>,
    ) -> (StageOutcome, bool) {
        if let Some(hit) = self.inner.cache.get(key).await {
            debug!(stage, tier = %hit.tier, "Served from cache");
            return (Ok(hit.payload), true);
        }

        let Some(input) = input else {
            let error = ComputeError::new(
                stage,
                ComputeErrorKind::UpstreamFailed,
                "background removal produced no output",
            );
            return (Err(error), false);
        };

        let cache = self.inner.cache.clone();
        let ttl = self.inner.config.result_ttl();
        let key = key.clone();
        let params = params.clone();
        let task = tokio::spawn(
            async move {
                let output = transform.compute(input, &params).await?;
                let report = cache.put(&key, output.clone(), ttl).await;
                if !report.is_complete() {
                    debug!(key = %key, failed = ?report.failed, "Result stored in a subset of tiers");
                }
                Ok::<Bytes, Error>(output)
            }
            .in_current_span(),
        );

        let outcome = match task.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ComputeError::failed(stage, e.to_string())),
            Err(e) => Err(ComputeError::failed(
                stage,
                format!("transform task aborted: {}", e),
            )),
        };
        (outcome, false)
    }

    async fn not_registered(&self, spec: &StageSpec, progress: &SessionProgress) -> StageRecord {
        let error = ComputeError::new(
            spec.name(),
            ComputeErrorKind::NotRegistered,
            format!("no transform registered for {}", spec.kind),
        );
        self.fail_unplanned(spec, error, progress).await
    }

    async fn fail_unplanned(
        &self,
        spec: &StageSpec,
        error: ComputeError,
        progress: &SessionProgress,
    ) -> StageRecord {
        let stage = spec.name();
        warn!(stage = %stage, kind = ?error.kind, error = %error.message, "Stage skipped");
        progress
            .emit(&stage, 0, "started", ProgressDetail::StageStarted)
            .await;
        self.emit_failure(&stage, &error, 0, progress).await;
        StageRecord {
            stage,
            outcome: Err(error),
            cache_hit: false,
            elapsed_ms: 0,
        }
    }

    async fn emit_failure(
        &self,
        stage: &str,
        error: &ComputeError,
        elapsed_ms: u64,
        progress: &SessionProgress,
    ) {
        progress
            .emit(
                stage,
                100,
                error.message.clone(),
                ProgressDetail::StageFailed {
                    kind: error.kind,
                    error: error.message.clone(),
                    elapsed_ms,
                },
            )
            .await;
    }

    async fn relieve_memory(&self) {
        let governor = Arc::clone(&self.inner.governor);
        match tokio::task::spawn_blocking(move || governor.relieve_if_needed()).await {
            Ok(Some(report)) => debug!(
                reclaimed_bytes = report.reclaimed_bytes,
                failures = report.failures.len(),
                "Relieved memory pressure between effects"
            ),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Memory relief task failed"),
        }
    }
}

/// What effect stages consume.
enum Upstream {
    /// No background removal requested.
    Original(Bytes),
    /// Background removal ran; `output` is `None` if it failed.
    Stage { output: Option<Bytes>, key: CacheKey },
    /// Background removal was requested but has no transform.
    Unplanned,
}
