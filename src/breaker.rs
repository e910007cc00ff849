//! Three-state circuit breaker guarding calls to the data source (§4.6).
//!
//! State is held as a single `AtomicU8` tag plus a timestamp, advanced with
//! compare-and-swap the way `enterprise::cache::lock`'s `LockStatus`
//! transitions are driven by CAS rather than a mutex-guarded enum — the
//! breaker is on the hot path of every cache miss and must not block.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::BreakerConfig;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as i64
}

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

/// Observable state of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn from_tag(tag: u8) -> Self {
        match tag {
            CLOSED => BreakerState::Closed,
            OPEN => BreakerState::Open,
            HALF_OPEN => BreakerState::HalfOpen,
            _ => unreachable!("breaker tag out of range"),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// A per-data-source circuit breaker, per §4.6's state table:
///
/// | from       | event                    | to         |
/// |------------|--------------------------|------------|
/// | CLOSED     | consecutive failures >= threshold | OPEN |
/// | OPEN       | reset_timeout elapsed    | HALF_OPEN  |
/// | HALF_OPEN  | probe succeeds           | CLOSED     |
/// | HALF_OPEN  | probe fails              | OPEN       |
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    opened_at_millis: AtomicI64,
    failure_threshold: u32,
    reset_timeout: Duration,
    /// Guards against multiple concurrent callers entering HALF_OPEN and
    /// each issuing their own probe; only the caller that wins the CAS may
    /// probe, everyone else sees `Open` and takes the fallback.
    probe_in_flight: AtomicU8,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            opened_at_millis: AtomicI64::new(0),
            failure_threshold: config.failure_threshold,
            reset_timeout: config.reset_timeout,
            probe_in_flight: AtomicU8::new(0),
        }
    }

    /// Current state, resolving an `Open` breaker whose reset timeout has
    /// elapsed into `HalfOpen` as a side effect of the read (the CAS only
    /// succeeds for one caller; others observe the new state).
    pub fn state(&self) -> BreakerState {
        let tag = self.state.load(Ordering::SeqCst);
        if tag == OPEN {
            let opened_at = self.opened_at_millis.load(Ordering::SeqCst);
            if now_millis() - opened_at >= self.reset_timeout.as_millis() as i64 {
                let _ = self
                    .state
                    .compare_exchange(OPEN, HALF_OPEN, Ordering::SeqCst, Ordering::SeqCst);
                return BreakerState::from_tag(self.state.load(Ordering::SeqCst));
            }
        }
        BreakerState::from_tag(tag)
    }

    /// Whether a call should be attempted right now. In `HalfOpen`, only one
    /// caller is admitted as the probe; concurrent callers are rejected until
    /// the probe resolves.
    fn should_attempt(&self) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => self
                .probe_in_flight
                .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok(),
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let prior = self.state.swap(CLOSED, Ordering::SeqCst);
        if prior == HALF_OPEN {
            self.probe_in_flight.store(0, Ordering::SeqCst);
        }
    }

    fn record_failure(&self) {
        let current = self.state();
        match current {
            BreakerState::HalfOpen => {
                self.trip();
                self.probe_in_flight.store(0, Ordering::SeqCst);
            }
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.failure_threshold {
                    self.trip();
                }
            }
            BreakerState::Open => {}
        }
    }

    fn trip(&self) {
        self.opened_at_millis.store(now_millis(), Ordering::SeqCst);
        self.state.store(OPEN, Ordering::SeqCst);
    }

    /// Run `primary` if the breaker admits the call, otherwise run
    /// `fallback` without attempting `primary` at all (§4.6: "return
    /// fallback immediately" is the OPEN-state transition only). A `primary`
    /// success closes the breaker; a `primary` failure counts toward
    /// tripping it and is propagated as-is — the breaker does not retry
    /// into `fallback` on its own account once `primary` has actually run.
    pub async fn execute<T, E, F, Fut, FB, FbFut>(&self, primary: F, fallback: FB) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        FB: FnOnce() -> FbFut,
        FbFut: std::future::Future<Output = Result<T, E>>,
    {
        if !self.should_attempt() {
            return fallback().await;
        }

        match primary().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(&BreakerConfig {
            failure_threshold: threshold,
            reset_timeout: reset,
        })
    }

    #[tokio::test]
    async fn trips_after_threshold_consecutive_failures() {
        let b = breaker(3, Duration::from_secs(30));
        for _ in 0..2 {
            let _: Result<(), &str> = b
                .execute(|| async { Err("boom") }, || async { Err("boom") })
                .await;
        }
        assert_eq!(b.state(), BreakerState::Closed);

        let _: Result<(), &str> = b
            .execute(|| async { Err("boom") }, || async { Err("boom") })
            .await;
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_breaker() {
        let b = breaker(1, Duration::from_millis(10));
        let _: Result<(), &str> = b
            .execute(|| async { Err("boom") }, || async { Err("boom") })
            .await;
        assert_eq!(b.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        let result: Result<i32, &str> = b
            .execute(|| async { Ok(1) }, || async { Err("boom") })
            .await;
        assert_eq!(result, Ok(1));
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens_breaker() {
        let b = breaker(1, Duration::from_millis(10));
        let _: Result<(), &str> = b
            .execute(|| async { Err("boom") }, || async { Err("boom") })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        let _: Result<(), &str> = b
            .execute(|| async { Err("boom") }, || async { Err("boom") })
            .await;
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn open_breaker_skips_primary_and_uses_fallback() {
        let b = breaker(1, Duration::from_secs(30));
        let _: Result<(), &str> = b
            .execute(|| async { Err("boom") }, || async { Err("boom") })
            .await;
        assert_eq!(b.state(), BreakerState::Open);

        let mut primary_called = false;
        let result = b
            .execute(
                || {
                    primary_called = true;
                    async { Ok::<i32, &str>(1) }
                },
                || async { Ok::<i32, &str>(99) },
            )
            .await;
        assert!(!primary_called);
        assert_eq!(result, Ok(99));
    }
}
