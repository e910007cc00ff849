//! Entry model and the enumerations shared across the facade and its
//! collaborators (§3).

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Process-wide monotonic version counter.
///
/// Versions are advisory only (debugging / future CAS) and are never
/// consulted by the facade for correctness, per §3.
static VERSION_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_version() -> u64 {
    VERSION_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Milliseconds since the Unix epoch. Used instead of `Instant` so entries
/// can cross the far-cache wire and be compared against wall-clock `now`.
pub type WallClock = u64;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> WallClock {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as u64
}

/// Render a [`WallClock`] as a UTC timestamp for logging and diagnostics.
/// Falls back to the current time if `ms` is outside `chrono`'s range.
pub fn to_utc(ms: WallClock) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .unwrap_or_else(Utc::now)
}

/// An immutable cache record.
///
/// `payload` is `None` for a negative entry (`is_negative` is then `true`);
/// the two are kept separate because a negative entry may, in principle, be
/// revisited and is never confused with "tier miss" by callers that inspect
/// the entry directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry<V> {
    /// The cached payload. `None` for negative (non-existence) entries.
    pub payload: Option<V>,
    /// Creation instant, wall-clock milliseconds.
    pub created_at: WallClock,
    /// Expiry instant, wall-clock milliseconds.
    pub expires_at: WallClock,
    /// Monotonically increasing, advisory version.
    pub version: u64,
    /// True for negative (authoritative-absence) entries.
    pub is_negative: bool,
    /// True if the entry was written while its key was classified hot.
    pub is_hot: bool,
}

impl<V> Entry<V> {
    /// Build a positive entry expiring `ttl` from now.
    pub fn positive(payload: V, ttl: Duration, is_hot: bool) -> Self {
        let created_at = now_millis();
        Self {
            payload: Some(payload),
            created_at,
            expires_at: created_at + ttl.as_millis() as u64,
            version: next_version(),
            is_negative: false,
            is_hot,
        }
    }

    /// Build a negative (authoritative-absence) entry expiring `ttl` from now.
    pub fn negative(ttl: Duration) -> Self {
        let created_at = now_millis();
        Self {
            payload: None,
            created_at,
            expires_at: created_at + ttl.as_millis() as u64,
            version: next_version(),
            is_negative: true,
            is_hot: false,
        }
    }

    /// An entry is stale once wall-clock exceeds its expiry.
    pub fn is_stale(&self) -> bool {
        now_millis() >= self.expires_at
    }

    /// Creation time as a UTC timestamp, for logging and diagnostics.
    pub fn created_at_utc(&self) -> DateTime<Utc> {
        to_utc(self.created_at)
    }

    /// Expiry time as a UTC timestamp, for logging and diagnostics.
    pub fn expires_at_utc(&self) -> DateTime<Utc> {
        to_utc(self.expires_at)
    }
}

/// Which tier served (or was written to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheLevel {
    /// Process-local near cache.
    L1Near,
    /// Shared, networked far cache.
    L2Far,
}

impl CacheLevel {
    /// Label used in metrics export and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            CacheLevel::L1Near => "l1_near",
            CacheLevel::L2Far => "l2_far",
        }
    }
}

/// The facade operation a latency timer is recorded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheOperation {
    Get,
    Put,
    Delete,
}

impl CacheOperation {
    pub fn label(&self) -> &'static str {
        match self {
            CacheOperation::Get => "get",
            CacheOperation::Put => "put",
            CacheOperation::Delete => "delete",
        }
    }
}

/// The four mass-miss pathologies the facade instruments against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheEventType {
    Penetration,
    AvalancheRisk,
    Breakdown,
    CircuitOpen,
}

impl CacheEventType {
    pub fn label(&self) -> &'static str {
        match self {
            CacheEventType::Penetration => "penetration",
            CacheEventType::AvalancheRisk => "avalanche_risk",
            CacheEventType::Breakdown => "breakdown",
            CacheEventType::CircuitOpen => "circuit_open",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_monotonic() {
        let a: Entry<i32> = Entry::positive(1, Duration::from_secs(1), false);
        let b: Entry<i32> = Entry::positive(2, Duration::from_secs(1), false);
        assert!(b.version > a.version);
    }

    #[test]
    fn negative_entry_has_no_payload() {
        let entry: Entry<i32> = Entry::negative(Duration::from_secs(1));
        assert!(entry.is_negative);
        assert!(entry.payload.is_none());
    }

    #[test]
    fn entry_becomes_stale_after_ttl() {
        let entry: Entry<i32> = Entry::positive(1, Duration::from_millis(0), false);
        std::thread::sleep(Duration::from_millis(5));
        assert!(entry.is_stale());
    }

    #[test]
    fn expires_at_utc_is_after_created_at_utc_for_a_positive_ttl() {
        let entry: Entry<i32> = Entry::positive(1, Duration::from_secs(60), false);
        assert!(entry.expires_at_utc() > entry.created_at_utc());
    }
}
