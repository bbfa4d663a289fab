//! Per-tier circuit breaker.
//!
//! ```text
//! Closed --[failure_threshold consecutive failures]--> Open
//! Open --[cooldown elapsed, next request admitted as trial]--> HalfOpen
//! HalfOpen --[trial succeeds]--> Closed
//! HalfOpen --[trial fails]--> Open (fresh cooldown)
//! ```
//!
//! Only one trial is admitted while half-open; everyone else skips the tier
//! until it resolves. A trial whose outcome is never recorded is re-admitted
//! after another cooldown.

use darkroom_core::TierId;
use darkroom_core::ports::TierKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    60
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of one tier's breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierHealth {
    pub tier: TierId,
    pub kind: TierKind,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    /// Time until a trial request will be admitted, when open.
    pub retry_in_ms: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_started: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    tier: TierId,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    total_failures: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(tier: TierId, config: BreakerConfig) -> Self {
        Self {
            tier,
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_started: None,
            }),
            total_failures: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Whether a request may be routed to the tier now.
    ///
    /// May transition Open to HalfOpen, in which case the caller holds the
    /// single trial slot and must report its outcome.
    pub fn allow(&self) -> bool {
        let cooldown = self.config.cooldown();
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner.opened_at.is_none_or(|at| now.duration_since(at) >= cooldown);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_started = Some(now);
                    info!(tier = %self.tier, "Circuit half-open, admitting trial request");
                }
                elapsed
            }
            BreakerState::HalfOpen => {
                let stale = inner
                    .trial_started
                    .is_none_or(|at| now.duration_since(at) >= cooldown);
                if stale {
                    inner.trial_started = Some(now);
                }
                stale
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.trial_started = None;
                info!(tier = %self.tier, "Circuit closed, tier recovered");
            }
            // A request admitted before the breaker opened; it proves nothing.
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    warn!(
                        tier = %self.tier,
                        failures = inner.consecutive_failures,
                        cooldown_secs = self.config.cooldown_secs,
                        "Circuit opened, tier bypassed"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.trial_started = None;
                inner.consecutive_failures += 1;
                info!(tier = %self.tier, "Trial request failed, circuit re-opened");
            }
            BreakerState::Open => {}
        }
    }

    pub fn health(&self, kind: TierKind) -> TierHealth {
        let inner = self.inner.lock();
        let retry_in_ms = match (inner.state, inner.opened_at) {
            (BreakerState::Open, Some(at)) => Some(
                self.config
                    .cooldown()
                    .saturating_sub(at.elapsed())
                    .as_millis() as u64,
            ),
            _ => None,
        };

        TierHealth {
            tier: self.tier.clone(),
            kind,
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_failures: self.total_failures.load(Ordering::Relaxed),
            retry_in_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(TierId::new("nats"), BreakerConfig::default())
    }

    fn trip(b: &CircuitBreaker) {
        for _ in 0..5 {
            assert!(b.allow());
            b.record_failure();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let b = breaker();
        for _ in 0..4 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());
        assert_eq!(b.health(TierKind::SharedNetwork).retry_in_ms, Some(60_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let b = breaker();
        for _ in 0..4 {
            b.record_failure();
        }
        b.record_success();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.health(TierKind::SharedNetwork).total_failures, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let b = breaker();
        trip(&b);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!b.allow());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(b.allow());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(!b.allow());

        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens_with_fresh_cooldown() {
        let b = breaker();
        trip(&b);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(b.allow());
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!b.allow());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(b.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_is_readmitted() {
        let b = breaker();
        trip(&b);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(b.allow());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(b.allow());
        assert_eq!(b.state(), BreakerState::HalfOpen);
    }
}
