//! Metrics recorder: hit/miss counters per tier, event counters per
//! mass-miss pathology, and per-operation latency averages, exported in
//! Prometheus text exposition format (§7).
//!
//! Grounded on `enterprise::tracing::metrics`'s `MetricRegistry` and its
//! `prometheus_export()` — same `# HELP` / `# TYPE` framing, same
//! `DashMap`-backed counter storage, generalized from free-form metric names
//! to the fixed label set this crate needs.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::model::{now_millis, CacheEventType, CacheLevel, CacheOperation, WallClock};

#[derive(Default)]
struct LatencyAccumulator {
    total_nanos: AtomicU64,
    count: AtomicU64,
}

impl LatencyAccumulator {
    fn record(&self, elapsed: Duration) {
        self.total_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn average_nanos(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.total_nanos.load(Ordering::Relaxed) as f64 / count as f64
    }
}

/// Central metrics sink for one cache instance.
pub struct MetricsRecorder {
    hits: DashMap<CacheLevel, AtomicU64>,
    misses: DashMap<CacheLevel, AtomicU64>,
    events: DashMap<CacheEventType, AtomicU64>,
    latency: DashMap<CacheOperation, LatencyAccumulator>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            hits: DashMap::new(),
            misses: DashMap::new(),
            events: DashMap::new(),
            latency: DashMap::new(),
        }
    }

    pub fn record_hit(&self, level: CacheLevel) {
        self.hits
            .entry(level)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self, level: CacheLevel) {
        self.misses
            .entry(level)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event(&self, event: CacheEventType) {
        self.events
            .entry(event)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, operation: CacheOperation, elapsed: Duration) {
        self.latency
            .entry(operation)
            .or_insert_with(LatencyAccumulator::default)
            .record(elapsed);
    }

    pub fn hit_count(&self, level: CacheLevel) -> u64 {
        self.hits
            .get(&level)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn miss_count(&self, level: CacheLevel) -> u64 {
        self.misses
            .get(&level)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn event_count(&self, event: CacheEventType) -> u64 {
        self.events
            .get(&event)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn average_latency_nanos(&self, operation: CacheOperation) -> f64 {
        self.latency
            .get(&operation)
            .map(|acc| acc.average_nanos())
            .unwrap_or(0.0)
    }

    /// `hits / (hits + misses)` for one tier, `0.0` if neither has been
    /// recorded yet.
    pub fn hit_rate(&self, level: CacheLevel) -> f64 {
        let hits = self.hit_count(level) as f64;
        let misses = self.miss_count(level) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }

    /// A consistent point-in-time view across every tracked series (§4.11).
    /// "Consistent" here means each field is read from the same set of
    /// lock-free counters within one call, not that the whole snapshot is
    /// transactional against concurrent writers — the counters are
    /// monotonic adders, so a snapshot is always a valid (if possibly
    /// slightly stale) prefix of the true counts.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let levels = [CacheLevel::L1Near, CacheLevel::L2Far];
        let ops = [CacheOperation::Get, CacheOperation::Put, CacheOperation::Delete];
        let events = [
            CacheEventType::Penetration,
            CacheEventType::AvalancheRisk,
            CacheEventType::Breakdown,
            CacheEventType::CircuitOpen,
        ];

        MetricsSnapshot {
            timestamp: now_millis(),
            hits_by_level: levels.iter().map(|&l| (l, self.hit_count(l))).collect(),
            misses_by_level: levels.iter().map(|&l| (l, self.miss_count(l))).collect(),
            hit_rates_by_level: levels.iter().map(|&l| (l, self.hit_rate(l))).collect(),
            avg_latency_by_op: ops
                .iter()
                .map(|&o| (o, self.average_latency_nanos(o)))
                .collect(),
            events_by_type: events.iter().map(|&e| (e, self.event_count(e))).collect(),
        }
    }

    /// Render every tracked series as Prometheus text exposition, using the
    /// series names and label keys from §4.11 verbatim.
    pub fn export_text(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP cache_hits_total Cache hits by tier\n");
        out.push_str("# TYPE cache_hits_total counter\n");
        for level in [CacheLevel::L1Near, CacheLevel::L2Far] {
            out.push_str(&format!(
                "cache_hits_total{{level=\"{}\"}} {}\n",
                level.label(),
                self.hit_count(level)
            ));
        }

        out.push_str("# HELP cache_misses_total Cache misses by tier\n");
        out.push_str("# TYPE cache_misses_total counter\n");
        for level in [CacheLevel::L1Near, CacheLevel::L2Far] {
            out.push_str(&format!(
                "cache_misses_total{{level=\"{}\"}} {}\n",
                level.label(),
                self.miss_count(level)
            ));
        }

        out.push_str("# HELP cache_hit_rate Cache hit rate by tier, in [0, 1]\n");
        out.push_str("# TYPE cache_hit_rate gauge\n");
        for level in [CacheLevel::L1Near, CacheLevel::L2Far] {
            out.push_str(&format!(
                "cache_hit_rate{{level=\"{}\"}} {}\n",
                level.label(),
                self.hit_rate(level)
            ));
        }

        out.push_str("# HELP cache_operation_latency_nanoseconds Average per-operation latency\n");
        out.push_str("# TYPE cache_operation_latency_nanoseconds gauge\n");
        for op in [CacheOperation::Get, CacheOperation::Put, CacheOperation::Delete] {
            out.push_str(&format!(
                "cache_operation_latency_nanoseconds{{operation=\"{}\"}} {}\n",
                op.label(),
                self.average_latency_nanos(op)
            ));
        }

        out.push_str("# HELP cache_events_total Mass-miss protection events\n");
        out.push_str("# TYPE cache_events_total counter\n");
        for event in [
            CacheEventType::Penetration,
            CacheEventType::AvalancheRisk,
            CacheEventType::Breakdown,
            CacheEventType::CircuitOpen,
        ] {
            out.push_str(&format!(
                "cache_events_total{{type=\"{}\"}} {}\n",
                event.label(),
                self.event_count(event)
            ));
        }

        out
    }
}

/// A consistent point-in-time view of every tracked series (§4.11).
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: WallClock,
    pub hits_by_level: HashMap<CacheLevel, u64>,
    pub misses_by_level: HashMap<CacheLevel, u64>,
    pub hit_rates_by_level: HashMap<CacheLevel, f64>,
    pub avg_latency_by_op: HashMap<CacheOperation, f64>,
    pub events_by_type: HashMap<CacheEventType, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_and_miss_counters_are_independent_per_tier() {
        let metrics = MetricsRecorder::new();
        metrics.record_hit(CacheLevel::L1Near);
        metrics.record_hit(CacheLevel::L1Near);
        metrics.record_miss(CacheLevel::L2Far);

        assert_eq!(metrics.hit_count(CacheLevel::L1Near), 2);
        assert_eq!(metrics.hit_count(CacheLevel::L2Far), 0);
        assert_eq!(metrics.miss_count(CacheLevel::L2Far), 1);
    }

    #[test]
    fn latency_average_reflects_recorded_samples() {
        let metrics = MetricsRecorder::new();
        metrics.record_latency(CacheOperation::Get, Duration::from_millis(10));
        metrics.record_latency(CacheOperation::Get, Duration::from_millis(20));

        let avg_millis = metrics.average_latency_nanos(CacheOperation::Get) / 1_000_000.0;
        assert!((avg_millis - 15.0).abs() < 0.5);
    }

    #[test]
    fn export_text_contains_help_and_type_lines() {
        let metrics = MetricsRecorder::new();
        metrics.record_event(CacheEventType::Penetration);
        let text = metrics.export_text();

        assert!(text.contains("# HELP cache_hits_total"));
        assert!(text.contains("cache_events_total{type=\"penetration\"} 1"));
    }

    #[test]
    fn hit_rate_is_consistent_with_hits_and_misses_in_one_snapshot() {
        let metrics = MetricsRecorder::new();
        metrics.record_hit(CacheLevel::L1Near);
        metrics.record_hit(CacheLevel::L1Near);
        metrics.record_hit(CacheLevel::L1Near);
        metrics.record_miss(CacheLevel::L1Near);

        let snapshot = metrics.snapshot();
        let hits = snapshot.hits_by_level[&CacheLevel::L1Near] as f64;
        let misses = snapshot.misses_by_level[&CacheLevel::L1Near] as f64;
        let rate = snapshot.hit_rates_by_level[&CacheLevel::L1Near];

        assert_eq!(rate, hits / (hits + misses));
    }

    #[test]
    fn hit_rate_is_zero_with_no_samples() {
        let metrics = MetricsRecorder::new();
        assert_eq!(metrics.hit_rate(CacheLevel::L2Far), 0.0);
    }
}
