//! Pipeline configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Deadline for a single stage, cache lookup included.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    /// Effects run concurrently when greater than 1.
    #[serde(default = "default_max_parallel_effects")]
    pub max_parallel_effects: usize,

    /// Sessions processed at once; further calls wait.
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,

    /// TTL for stage outputs written to the cache.
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,

    /// Per-session progress channel capacity.
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,

    #[serde(default)]
    pub governor: GovernorConfig,
}

fn default_stage_timeout_secs() -> u64 {
    120
}

fn default_max_parallel_effects() -> usize {
    1
}

fn default_max_concurrent_sessions() -> usize {
    4
}

fn default_result_ttl_secs() -> u64 {
    86400 * 7
}

fn default_progress_buffer() -> usize {
    64
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout_secs(),
            max_parallel_effects: default_max_parallel_effects(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            result_ttl_secs: default_result_ttl_secs(),
            progress_buffer: default_progress_buffer(),
            governor: GovernorConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_max_parallel_effects(mut self, n: usize) -> Self {
        self.max_parallel_effects = n.max(1);
        self
    }

    pub fn with_max_concurrent_sessions(mut self, n: usize) -> Self {
        self.max_concurrent_sessions = n.max(1);
        self
    }

    /// Per-stage deadline, never shorter than one second.
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs.max(1))
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// System used/total ratio at or above which memory is under pressure.
    #[serde(default = "default_pressure_ratio")]
    pub pressure_ratio: f64,

    /// Process resident size at or above which memory is under pressure.
    #[serde(default)]
    pub max_process_bytes: Option<u64>,

    /// Sessions with more effect stages than this consult the governor between effects.
    #[serde(default = "default_heavy_effect_count")]
    pub heavy_effect_count: usize,

    /// Inputs larger than this consult the governor between effects.
    #[serde(default = "default_heavy_input_bytes")]
    pub heavy_input_bytes: usize,
}

fn default_pressure_ratio() -> f64 {
    0.85
}

fn default_heavy_effect_count() -> usize {
    2
}

fn default_heavy_input_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            pressure_ratio: default_pressure_ratio(),
            max_process_bytes: None,
            heavy_effect_count: default_heavy_effect_count(),
            heavy_input_bytes: default_heavy_input_bytes(),
        }
    }
}

impl GovernorConfig {
    pub fn is_heavy(&self, effect_count: usize, input_bytes: usize) -> bool {
        effect_count > self.heavy_effect_count || input_bytes > self.heavy_input_bytes
    }
}
