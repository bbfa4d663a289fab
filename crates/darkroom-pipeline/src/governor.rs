//! Memory pressure detection and reclamation.

use crate::config::GovernorConfig;
use darkroom_core::Error;
use darkroom_core::ports::Reclaimer;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, info, warn};

/// Memory usage at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemorySample {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub process_bytes: Option<u64>,
}

impl MemorySample {
    pub fn used_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64
    }
}

/// Source of memory samples.
pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> MemorySample;
}

/// Samples the host with `sysinfo`.
pub struct SystemProbe {
    system: Mutex<System>,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemProbe {
    fn sample(&self) -> MemorySample {
        let mut sys = self.system.lock();
        sys.refresh_memory();

        let process_bytes = sysinfo::get_current_pid().ok().and_then(|pid| {
            sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            sys.process(pid).map(|p| p.memory())
        });

        MemorySample {
            used_bytes: sys.used_memory(),
            total_bytes: sys.total_memory(),
            process_bytes,
        }
    }
}

/// Outcome of one reclaim pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub reclaimed_bytes: u64,
    /// Names of reclaimers that failed or panicked.
    pub failures: Vec<String>,
}

pub struct MemoryGovernor {
    config: GovernorConfig,
    probe: Box<dyn MemoryProbe>,
    reclaimers: RwLock<Vec<Arc<dyn Reclaimer>>>,
    reclaim_failures: AtomicU64,
}

impl MemoryGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self::with_probe(config, Box::new(SystemProbe::new()))
    }

    pub fn with_probe(config: GovernorConfig, probe: Box<dyn MemoryProbe>) -> Self {
        Self {
            config,
            probe,
            reclaimers: RwLock::new(Vec::new()),
            reclaim_failures: AtomicU64::new(0),
        }
    }

    pub fn register(&self, reclaimer: Arc<dyn Reclaimer>) {
        debug!(reclaimer = reclaimer.name(), "Registered reclaimer");
        self.reclaimers.write().push(reclaimer);
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn sample(&self) -> MemorySample {
        self.probe.sample()
    }

    pub fn is_under_pressure(&self) -> bool {
        let sample = self.probe.sample();
        let system = sample.used_ratio() >= self.config.pressure_ratio;
        let process = match (self.config.max_process_bytes, sample.process_bytes) {
            (Some(limit), Some(rss)) => rss >= limit,
            _ => false,
        };
        system || process
    }

    /// Run every reclaimer. Never fails; failures are logged and counted.
    pub fn force_reclaim(&self) -> ReclaimReport {
        let reclaimers = self.reclaimers.read().clone();
        let mut report = ReclaimReport::default();

        for reclaimer in reclaimers {
            let name = reclaimer.name().to_string();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| reclaimer.reclaim()));
            let error = match outcome {
                Ok(Ok(bytes)) => {
                    report.reclaimed_bytes += bytes;
                    continue;
                }
                Ok(Err(e)) => Error::ResourceExhausted(format!("{} failed to reclaim: {}", name, e)),
                Err(_) => Error::ResourceExhausted(format!("{} panicked while reclaiming", name)),
            };
            self.reclaim_failures.fetch_add(1, Ordering::Relaxed);
            warn!(reclaimer = %name, error = %error, "Reclaim failed");
            report.failures.push(name);
        }

        info!(
            reclaimed_bytes = report.reclaimed_bytes,
            failures = report.failures.len(),
            "Forced memory reclaim"
        );
        report
    }

    /// Reclaim only when under pressure.
    pub fn relieve_if_needed(&self) -> Option<ReclaimReport> {
        if self.is_under_pressure() {
            Some(self.force_reclaim())
        } else {
            None
        }
    }

    pub fn reclaim_failures(&self) -> u64 {
        self.reclaim_failures.load(Ordering::Relaxed)
    }
}
