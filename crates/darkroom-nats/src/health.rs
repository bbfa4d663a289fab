//! Health check for the KV tier.

use crate::metrics::KvMetrics;

/// Health status of the NATS connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// Degraded but functional.
    Degraded { reason: String },
    Unhealthy { reason: String },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Healthy or degraded.
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded { .. })
    }
}

/// Health check result with details.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub connected: bool,
    pub hits: u64,
    pub misses: u64,
    pub put_failures: u64,
    pub skipped_oversize: u64,
}

impl HealthCheck {
    pub fn from_metrics(metrics: &KvMetrics, connected: bool) -> Self {
        let snapshot = metrics.snapshot();

        let status = if !connected {
            HealthStatus::Unhealthy {
                reason: "Not connected to NATS".to_string(),
            }
        } else if snapshot.put_failures > 0 {
            HealthStatus::Degraded {
                reason: format!("{} put failures recorded", snapshot.put_failures),
            }
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            connected,
            hits: snapshot.hits,
            misses: snapshot.misses,
            put_failures: snapshot.put_failures,
            skipped_oversize: snapshot.skipped_oversize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_metrics() {
        let metrics = KvMetrics::new();
        assert!(HealthCheck::from_metrics(&metrics, true).status.is_healthy());

        metrics.record_put_failure();
        let check = HealthCheck::from_metrics(&metrics, true);
        assert!(check.status.is_operational());
        assert!(!check.status.is_healthy());

        assert!(!HealthCheck::from_metrics(&metrics, false).status.is_operational());
    }
}
