//! Retry executor and error-disposition policy (§4.10).
//!
//! Exponential backoff follows the same `initial * multiplier^(n-1)` shape,
//! capped at `max_delay`, used throughout the corpus's job/worker retry
//! loops; the disposition table below is this crate's own addition, mapping
//! `CacheErrorType` to what the facade should do about it.

use std::collections::HashSet;
use std::time::Duration;

use crate::error::{CacheError, CacheErrorType};

/// What the error handler reports about a classified error, independent of
/// whether the retry executor will actually retry it (§4.10: "emits a
/// `circuit_break` disposition distinct from `retry` / `no_retry` /
/// `fallback`" — a `DataSource` error is simultaneously retryable *and*
/// circuit-breaker-worthy, so this is informational, not a retry gate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Subject to the retry budget (membership in `retryable_errors`).
    Retry,
    /// Give up on the primary path and use the configured fallback.
    Fallback,
    /// Count this failure toward tripping the circuit breaker.
    CircuitBreak,
    /// Propagate immediately; retrying would not help.
    NoRetry,
}

/// Classifies an error for logging/metrics purposes (§4.10): data-source
/// failures are always circuit-breaker-worthy, lock timeouts fall back to a
/// direct load, near-cache and serialization errors are never retried. This
/// is independent of `RetryConfig::retryable_errors`, which governs whether
/// the retry executor itself re-attempts the operation.
pub fn classify_disposition(error_type: CacheErrorType) -> Disposition {
    match error_type {
        CacheErrorType::DataSource => Disposition::CircuitBreak,
        CacheErrorType::L2Connection | CacheErrorType::L2Timeout => Disposition::Retry,
        CacheErrorType::LockTimeout => Disposition::Fallback,
        CacheErrorType::L1Error | CacheErrorType::Serialization => Disposition::NoRetry,
    }
}

/// Backoff/retry budget configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Error types the executor will retry; anything else surfaces on the
    /// first failure. Default per §4.10: `{L2_CONNECTION, L2_TIMEOUT,
    /// DATASOURCE}`.
    pub retryable_errors: HashSet<CacheErrorType>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            retryable_errors: HashSet::from([
                CacheErrorType::L2Connection,
                CacheErrorType::L2Timeout,
                CacheErrorType::DataSource,
            ]),
        }
    }
}

impl RetryConfig {
    /// Delay before the `attempt`-th retry (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32 - 1);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// Run `operation` with exponential-backoff retry, stopping early if the
/// classified disposition is not `Retry`.
pub async fn execute_with_retry<T, F, Fut>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, CacheError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, CacheError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = config.retryable_errors.contains(&err.classify());
                if !retryable || attempt >= config.max_attempts {
                    return Err(err);
                }
                tokio::time::sleep(config.delay_for_attempt(attempt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn l2_errors_are_retryable() {
        assert_eq!(
            classify_disposition(CacheErrorType::L2Connection),
            Disposition::Retry
        );
        assert_eq!(
            classify_disposition(CacheErrorType::L2Timeout),
            Disposition::Retry
        );
    }

    #[test]
    fn data_source_errors_trip_the_breaker() {
        assert_eq!(
            classify_disposition(CacheErrorType::DataSource),
            Disposition::CircuitBreak
        );
    }

    #[test]
    fn lock_timeout_falls_back() {
        assert_eq!(
            classify_disposition(CacheErrorType::LockTimeout),
            Disposition::Fallback
        );
    }

    #[test]
    fn delay_grows_exponentially_then_caps() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            multiplier: 2.0,
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(300));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn retry_stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            ..RetryConfig::default()
        };

        let result: Result<(), CacheError> = execute_with_retry(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CacheError::L2Timeout("down".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();

        let result: Result<(), CacheError> = execute_with_retry(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CacheError::Near("boom".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn data_source_errors_are_retried_by_default() {
        // §4.10: DataSource is both in the default retryable set and
        // circuit-breaker-worthy — these are independent classifications.
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        };

        let result: Result<(), CacheError> = execute_with_retry(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CacheError::DataSource("unreachable".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            classify_disposition(CacheErrorType::DataSource),
            Disposition::CircuitBreak
        );
    }
}
