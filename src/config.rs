//! Frozen configuration, validated once at construction (§3).

use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Near-cache (L1) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearConfig {
    /// Maximum number of resident entries.
    pub max_size: u64,
    /// Default time-to-live for near-cache writes.
    pub default_ttl: Duration,
    /// Whether to record hit/miss/eviction statistics.
    pub record_stats: bool,
}

impl Default for NearConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            default_ttl: Duration::from_secs(60),
            record_stats: true,
        }
    }
}

/// Far-cache (L2) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarConfig {
    /// Default time-to-live for far-cache writes, before jitter.
    pub default_ttl: Duration,
    /// TTL jitter percentage, clamped into `[10, 30]` before use.
    pub ttl_jitter_pct: u8,
    /// Wait-limit and auto-release TTL for the single-flight lock.
    pub lock_timeout: Duration,
}

impl Default for FarConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            ttl_jitter_pct: 20,
            lock_timeout: Duration::from_secs(3),
        }
    }
}

/// Approximate-membership filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Expected number of distinct keys to size the filter for.
    pub expected_insertions: usize,
    /// Target false-positive rate.
    pub false_positive_rate: f64,
    /// Estimated-FP-rate threshold above which a rebuild warning is logged.
    pub rebuild_threshold: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            expected_insertions: 100_000,
            false_positive_rate: 0.01,
            rebuild_threshold: 0.05,
        }
    }
}

/// Negative (absence) caching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegativeConfig {
    /// Whether absent data-loader results are cached.
    pub enabled: bool,
    /// TTL for negative entries, capped at 5 minutes.
    pub ttl: Duration,
}

impl Default for NegativeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Sliding-window hot-key detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotKeyConfig {
    /// Access-count threshold within `window` to classify a key hot.
    pub threshold: u64,
    /// Sliding window duration.
    pub window: Duration,
}

impl Default for HotKeyConfig {
    fn default() -> Self {
        Self {
            threshold: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Circuit-breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures (in CLOSED) before tripping to OPEN.
    pub failure_threshold: u32,
    /// Time OPEN must hold before a HALF_OPEN probe is allowed.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Aggregate, frozen cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    pub near: NearConfig,
    pub far: FarConfig,
    pub filter: FilterConfig,
    pub negative: NegativeConfig,
    pub hot_key: HotKeyConfig,
    pub breaker: BreakerConfig,
}

impl CacheConfig {
    /// Validate every range constraint from the §3 configuration table.
    /// Called once by the facade/builder at construction time.
    pub fn validate(&self) -> CacheResult<()> {
        if self.near.max_size == 0 {
            return Err(CacheError::Config("near.max_size must be > 0".into()));
        }
        if self.near.default_ttl.is_zero() {
            return Err(CacheError::Config("near.default_ttl must be > 0".into()));
        }
        if self.far.default_ttl.is_zero() {
            return Err(CacheError::Config("far.default_ttl must be > 0".into()));
        }
        if !(10..=30).contains(&self.far.ttl_jitter_pct) {
            return Err(CacheError::Config(
                "far.ttl_jitter_pct must be in [10, 30]".into(),
            ));
        }
        if self.far.lock_timeout.is_zero() {
            return Err(CacheError::Config("far.lock_timeout must be > 0".into()));
        }
        if self.filter.expected_insertions == 0 {
            return Err(CacheError::Config(
                "filter.expected_insertions must be > 0".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.filter.false_positive_rate)
            || self.filter.false_positive_rate <= 0.0
        {
            return Err(CacheError::Config(
                "filter.false_positive_rate must be in (0, 1)".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.filter.rebuild_threshold)
            || self.filter.rebuild_threshold <= 0.0
        {
            return Err(CacheError::Config(
                "filter.rebuild_threshold must be in (0, 1)".into(),
            ));
        }
        if self.negative.ttl > Duration::from_secs(5 * 60) {
            return Err(CacheError::Config("negative.ttl must be <= 5 minutes".into()));
        }
        if self.hot_key.threshold == 0 {
            return Err(CacheError::Config("hot_key.threshold must be >= 1".into()));
        }
        if self.hot_key.window.is_zero() {
            return Err(CacheError::Config("hot_key.window must be > 0".into()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(CacheError::Config(
                "breaker.failure_threshold must be >= 1".into(),
            ));
        }
        if self.breaker.reset_timeout.is_zero() {
            return Err(CacheError::Config("breaker.reset_timeout must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn jitter_out_of_range_is_rejected() {
        let mut cfg = CacheConfig::default();
        cfg.far.ttl_jitter_pct = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn negative_ttl_over_cap_is_rejected() {
        let mut cfg = CacheConfig::default();
        cfg.negative.ttl = Duration::from_secs(600);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let mut cfg = CacheConfig::default();
        cfg.hot_key.threshold = 0;
        assert!(cfg.validate().is_err());
    }
}
