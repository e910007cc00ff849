//! Sliding-window hot-key detector — the breakdown-protection trigger (§4.7).
//!
//! Grounded on the sliding-window rate-limiting primitives in
//! `enterprise::ratelimit::algorithm` (`SlidingWindowLog`), generalized from
//! "allow/deny a request" to "classify a key hot or not" and keyed per
//! string rather than global.

use crate::config::HotKeyConfig;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_nanos() as u64
}

/// Per-key access history.
///
/// The counter is maintained with an atomic increment/decrement alongside a
/// mutex-guarded FIFO of timestamps; a transient disagreement between the
/// two is possible under concurrent access and is acceptable per §4.7 / §9
/// as long as it resolves within one further call — prune always trims the
/// queue down to agree with the window before re-reading the counter.
struct AccessRecord {
    timestamps: Mutex<VecDeque<u64>>,
    count: AtomicU64,
}

impl AccessRecord {
    fn new() -> Self {
        Self {
            timestamps: Mutex::new(VecDeque::new()),
            count: AtomicU64::new(0),
        }
    }

    /// Append `now`, prune everything older than `now - window`, and return
    /// the post-prune count.
    fn record_and_prune(&self, window: Duration) -> u64 {
        let now = now_nanos();
        let window_nanos = window.as_nanos() as u64;
        let cutoff = now.saturating_sub(window_nanos);

        let mut queue = self.timestamps.lock();
        queue.push_back(now);
        self.count.fetch_add(1, Ordering::SeqCst);

        while let Some(&oldest) = queue.front() {
            if oldest < cutoff {
                queue.pop_front();
                self.count.fetch_sub(1, Ordering::SeqCst);
            } else {
                break;
            }
        }

        self.count.load(Ordering::SeqCst)
    }

    /// Re-prune against a (possibly new) window without recording an access,
    /// used by `reconfigure`.
    fn reprune(&self, window: Duration) -> u64 {
        let now = now_nanos();
        let window_nanos = window.as_nanos() as u64;
        let cutoff = now.saturating_sub(window_nanos);

        let mut queue = self.timestamps.lock();
        while let Some(&oldest) = queue.front() {
            if oldest < cutoff {
                queue.pop_front();
                self.count.fetch_sub(1, Ordering::SeqCst);
            } else {
                break;
            }
        }
        self.count.load(Ordering::SeqCst)
    }
}

/// Tracks per-key access records and the set of keys currently over
/// threshold. Records are created lazily and never explicitly destroyed
/// (unbounded residual memory is tolerated, per §9).
pub struct HotKeyDetector {
    records: DashMap<String, AccessRecord>,
    hot_set: DashSet<String>,
    threshold: AtomicU64,
    window_nanos: AtomicI64,
}

impl HotKeyDetector {
    pub fn new(config: &HotKeyConfig) -> Self {
        Self {
            records: DashMap::new(),
            hot_set: DashSet::new(),
            threshold: AtomicU64::new(config.threshold),
            window_nanos: AtomicI64::new(config.window.as_nanos() as i64),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_nanos(self.window_nanos.load(Ordering::Relaxed) as u64)
    }

    fn threshold(&self) -> u64 {
        self.threshold.load(Ordering::Relaxed)
    }

    /// Record an access for `key`, pruning its history, and update hot-set
    /// membership. Transitions are monotone within this call: the key either
    /// enters or leaves the hot set exactly once per call, based on the
    /// post-prune count.
    pub fn record_access(&self, key: &str) {
        let count = {
            let entry = self
                .records
                .entry(key.to_string())
                .or_insert_with(AccessRecord::new);
            entry.record_and_prune(self.window())
        };

        if count >= self.threshold() {
            self.hot_set.insert(key.to_string());
        } else {
            self.hot_set.remove(key);
        }
    }

    /// Set-membership query.
    pub fn is_hot(&self, key: &str) -> bool {
        self.hot_set.contains(key)
    }

    /// Replace threshold/window and re-evaluate every known key's record
    /// against the new window.
    pub fn reconfigure(&self, threshold: u64, window: Duration) {
        self.threshold.store(threshold, Ordering::Relaxed);
        self.window_nanos
            .store(window.as_nanos() as i64, Ordering::Relaxed);

        for entry in self.records.iter() {
            let count = entry.value().reprune(window);
            let key = entry.key().clone();
            if count >= threshold {
                self.hot_set.insert(key);
            } else {
                self.hot_set.remove(&key);
            }
        }
    }

    /// Number of keys currently tracked (for diagnostics/tests).
    pub fn tracked_keys(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_becomes_hot_after_threshold_accesses() {
        let detector = HotKeyDetector::new(&HotKeyConfig {
            threshold: 3,
            window: Duration::from_secs(30),
        });

        assert!(!detector.is_hot("user:1"));
        detector.record_access("user:1");
        detector.record_access("user:1");
        assert!(!detector.is_hot("user:1"));
        detector.record_access("user:1");
        assert!(detector.is_hot("user:1"));
    }

    #[test]
    fn reconfigure_reevaluates_existing_keys() {
        let detector = HotKeyDetector::new(&HotKeyConfig {
            threshold: 2,
            window: Duration::from_secs(30),
        });
        detector.record_access("user:1");
        detector.record_access("user:1");
        assert!(detector.is_hot("user:1"));

        detector.reconfigure(10, Duration::from_secs(30));
        assert!(!detector.is_hot("user:1"));
    }

    #[test]
    fn distinct_keys_tracked_independently() {
        let detector = HotKeyDetector::new(&HotKeyConfig {
            threshold: 1,
            window: Duration::from_secs(30),
        });
        detector.record_access("a");
        assert!(detector.is_hot("a"));
        assert!(!detector.is_hot("b"));
    }
}
