//! Stage orchestration for Darkroom.
//!
//! [`TransformPipeline`] fingerprints an input once, then runs background
//! removal and effect stages through the tiered cache, invoking registered
//! transforms only on misses. Stage failures are recorded per stage and never
//! abort the session. [`MemoryGovernor`] relieves memory pressure between
//! effects and [`ProgressReporter`] delivers ordered progress per session.

pub mod config;
pub mod governor;
pub mod pipeline;
pub mod progress;
pub mod registry;

pub use config::{GovernorConfig, PipelineConfig};
pub use governor::{MemoryGovernor, MemoryProbe, MemorySample, ReclaimReport, SystemProbe};
pub use pipeline::{
    CacheInfo, ProcessOutcome, SESSION_STAGE, StageReport, Timings, TransformPipeline,
};
pub use progress::{ProgressReporter, SessionProgress};
pub use registry::TransformRegistry;
