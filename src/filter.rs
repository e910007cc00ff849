//! Approximate-membership filter — the penetration guard (§4.8).
//!
//! Backed by the `bloomfilter` crate rather than a hand-rolled bit array,
//! consistent with how the corpus's own distributed caches (e.g.
//! `beagle-cache`) reach for a Bloom filter crate instead of reimplementing
//! the hashing and bit-packing math.

use crate::config::FilterConfig;
use bloomfilter::Bloom;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Read-write discipline: many concurrent `might_contain` readers, one
/// exclusive `rebuild`. Readers observe a consistent snapshot across a
/// rebuild because the swap happens under the write guard in one step.
pub struct MembershipFilter {
    inner: RwLock<Bloom<String>>,
    expected_insertions: usize,
    false_positive_rate: f64,
    rebuild_threshold: f64,
    actual_insertions: AtomicU64,
}

impl MembershipFilter {
    /// Build an empty filter sized from `config`.
    pub fn new(config: &FilterConfig) -> Self {
        let bloom = Bloom::new_for_fp_rate(config.expected_insertions, config.false_positive_rate);
        Self {
            inner: RwLock::new(bloom),
            expected_insertions: config.expected_insertions,
            false_positive_rate: config.false_positive_rate,
            rebuild_threshold: config.rebuild_threshold,
            actual_insertions: AtomicU64::new(0),
        }
    }

    /// May-contain test. False negatives are impossible for keys inserted
    /// since the last rebuild; false positives are bounded by the configured
    /// rate.
    pub fn might_contain(&self, key: &str) -> bool {
        self.inner.read().check(&key.to_string())
    }

    /// Insert a key. May be a no-op if the key is already (probably)
    /// present; correctness does not depend on detecting that.
    pub fn insert(&self, key: &str) {
        self.inner.write().set(&key.to_string());
        self.actual_insertions.fetch_add(1, Ordering::Relaxed);

        let fp_rate = self.estimated_fp_rate();
        if fp_rate > self.rebuild_threshold {
            warn!(
                estimated_fp_rate = fp_rate,
                rebuild_threshold = self.rebuild_threshold,
                "membership filter false-positive rate exceeds threshold; consider rebuild"
            );
        }
    }

    /// Atomically replace the filter with a freshly sized one, re-inserting
    /// every key in `keys`. Readers only block for the duration of the swap.
    pub fn rebuild<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut fresh = Bloom::new_for_fp_rate(self.expected_insertions, self.false_positive_rate);
        let mut count: u64 = 0;
        for key in keys {
            fresh.set(&key.as_ref().to_string());
            count += 1;
        }

        let mut guard = self.inner.write();
        *guard = fresh;
        drop(guard);
        self.actual_insertions.store(count, Ordering::Relaxed);
    }

    /// Analytic false-positive-rate estimate given the current fill level,
    /// following the standard Bloom filter formula
    /// `(1 - e^(-k*n/m))^k`.
    pub fn estimated_fp_rate(&self) -> f64 {
        let guard = self.inner.read();
        let m = guard.number_of_bits() as f64;
        let k = guard.number_of_hash_functions() as f64;
        drop(guard);
        let n = self.actual_insertions.load(Ordering::Relaxed) as f64;
        if m == 0.0 {
            return 0.0;
        }
        (1.0 - (-k * n / m).exp()).powf(k)
    }

    /// Number of keys inserted since construction or the last rebuild.
    pub fn actual_insertions(&self) -> u64 {
        self.actual_insertions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> MembershipFilter {
        MembershipFilter::new(&FilterConfig {
            expected_insertions: 1_000,
            false_positive_rate: 0.01,
            rebuild_threshold: 0.05,
        })
    }

    #[test]
    fn inserted_keys_are_never_false_negatives() {
        let f = filter();
        for i in 0..200 {
            f.insert(&format!("user:{i}"));
        }
        for i in 0..200 {
            assert!(f.might_contain(&format!("user:{i}")));
        }
    }

    #[test]
    fn never_inserted_key_is_usually_absent() {
        let f = filter();
        f.insert("user:1");
        assert!(!f.might_contain("user:999999"));
    }

    #[test]
    fn rebuild_replaces_contents_atomically() {
        let f = filter();
        f.insert("stale-key");
        f.rebuild(["user:1", "user:2", "user:3"]);

        assert!(f.might_contain("user:1"));
        assert!(f.might_contain("user:2"));
        assert!(f.might_contain("user:3"));
        assert_eq!(f.actual_insertions(), 3);
    }
}
