//! Far-cache (L2) trait, the single-flight lock contract, and two
//! implementations: `RedisFarCache` (the default, networked adapter) and
//! `InMemoryFarCache` (a deterministic test double).
//!
//! The Redis adapter's lock acquire/release follows the same
//! compare-and-delete-under-Lua discipline as `enterprise::cache::lock`'s
//! `DistributedMutex`: a unique token is written with `SET key token NX PX
//! ttl`, and release only deletes the key if the stored value still matches
//! the caller's token, so a lock can never be released by whoever's renewal
//! already expired it. The crate choice (`redis` with `ConnectionManager`
//! and `AsyncCommands`) mirrors `other_examples`'s `beagle-cache`.

use async_trait::async_trait;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::FarConfig;
use crate::error::{CacheError, CacheResult};
use crate::model::Entry;

/// Outcome of a lock attempt, per §4.9's combined `get_with_lock(k,
/// lock_timeout) → { value?, acquired, token? }`: the cached entry is
/// returned alongside the lock outcome regardless of whether the caller won
/// the lock, so a caller that lost the race can inspect it before waiting.
pub struct LockAttempt<V> {
    /// `Some(token)` if this call claimed the lock; `None` if another caller
    /// already holds it.
    pub token: Option<String>,
    /// The entry currently in the far cache for `key`, if any, read
    /// alongside the lock attempt.
    pub value: Option<Entry<V>>,
}

/// The far-cache contract. `acquire_lock` attempts the claim and, in the same
/// call, returns whatever entry currently sits in the far cache (§4.9):
/// callers that lose the race get `token: None` but may still find a usable
/// `value` to return without waiting.
#[async_trait]
pub trait FarCache<V>: Send + Sync
where
    V: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<Entry<V>>>;

    /// Write `entry` with TTL jittered within `[base*0.70, base*1.30]`
    /// per §4.9's avalanche protection, where `base` is the entry's own
    /// remaining TTL at call time.
    async fn put_with_random_ttl(&self, key: &str, entry: Entry<V>) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Attempt to acquire the single-flight lock for `key`, returning both
    /// the lock outcome and the entry currently cached for `key` (§4.9).
    async fn acquire_lock(&self, key: &str, lock_timeout: Duration) -> CacheResult<LockAttempt<V>>;

    /// Release a previously acquired lock. A no-op (not an error) if `token`
    /// no longer matches the stored value — it means the lock already expired
    /// and was possibly reacquired by someone else.
    async fn release_lock(&self, key: &str, token: &str) -> CacheResult<()>;

    async fn close(&self) -> CacheResult<()>;
}

fn lock_key(key: &str) -> String {
    format!("lock:{key}")
}

/// Draw an effective TTL within `[base*0.70, base*1.30]` per §4.9: the
/// magnitude `u` is always in `[0.10, 0.30]` (never ~0%, so avalanche
/// protection cannot degenerate to no jitter) with a fair-coin sign.
/// `jitter_pct` plays no part in the draw itself — §9 documents this as an
/// observed source anomaly (the argument is clamped at configuration time
/// but otherwise discarded) and asks implementers to preserve it as stated.
fn jittered_ttl(base: Duration, _jitter_pct: u8) -> Duration {
    let base_millis = base.as_millis() as i64;
    let magnitude = rand::thread_rng().gen_range(0.10_f64..=0.30_f64);
    let sign: i64 = if rand::thread_rng().gen_bool(0.5) { 1 } else { -1 };
    let delta = sign * (base_millis as f64 * magnitude) as i64;
    Duration::from_millis((base_millis + delta).max(1) as u64)
}

/// Redis-backed far cache.
pub struct RedisFarCache {
    conn: ConnectionManager,
    jitter_pct: u8,
    release_script: Script,
}

impl RedisFarCache {
    pub async fn connect(redis_url: &str, config: &FarConfig) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::L2Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::L2Connection(e.to_string()))?;

        // Compare-and-delete: only the holder whose token still matches gets
        // to release. Equivalent in spirit to DistributedMutex::unlock's
        // fencing-token check, expressed as a single atomic Redis script so
        // there is no read-then-delete race.
        let release_script = Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
            "#,
        );

        Ok(Self {
            conn,
            jitter_pct: config.ttl_jitter_pct,
            release_script,
        })
    }
}

#[async_trait]
impl<V> FarCache<V> for RedisFarCache
where
    V: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<Entry<V>>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put_with_random_ttl(&self, key: &str, entry: Entry<V>) -> CacheResult<()> {
        let remaining = entry
            .expires_at
            .saturating_sub(crate::model::now_millis());
        let ttl = jittered_ttl(Duration::from_millis(remaining.max(1)), self.jitter_pct);
        let json = serde_json::to_string(&entry)?;

        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, json, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, lock_timeout: Duration) -> CacheResult<LockAttempt<V>> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();
        let acquired: bool = redis::cmd("SET")
            .arg(lock_key(key))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(lock_timeout.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map(|v: Option<String>| v.is_some())?;

        let value = self.get(key).await?;
        Ok(LockAttempt {
            token: if acquired { Some(token) } else { None },
            value,
        })
    }

    async fn release_lock(&self, key: &str, token: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .release_script
            .key(lock_key(key))
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        Ok(())
    }
}

/// Deterministic, in-process test double — no network, no serialization
/// round trip, used by the crate's own integration tests. Modeled on the
/// teacher's `InMemoryStore` (`enterprise::cache::strategy`).
pub struct InMemoryFarCache<V> {
    entries: parking_lot::Mutex<HashMap<String, String>>,
    locks: parking_lot::Mutex<HashMap<String, String>>,
    jitter_pct: u8,
    _marker: std::marker::PhantomData<V>,
}

impl<V> InMemoryFarCache<V> {
    pub fn new(jitter_pct: u8) -> Self {
        Self {
            entries: parking_lot::Mutex::new(HashMap::new()),
            locks: parking_lot::Mutex::new(HashMap::new()),
            jitter_pct,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<V> Default for InMemoryFarCache<V> {
    fn default() -> Self {
        Self::new(20)
    }
}

#[async_trait]
impl<V> FarCache<V> for InMemoryFarCache<V>
where
    V: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<Entry<V>>> {
        let guard = self.entries.lock();
        match guard.get(key) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn put_with_random_ttl(&self, key: &str, entry: Entry<V>) -> CacheResult<()> {
        // TTL jitter only affects wire expiry bookkeeping on a real backend;
        // the in-memory double keeps the entry's own `expires_at` as-is and
        // only exercises the jitter math so it is not silently untested.
        let remaining = entry
            .expires_at
            .saturating_sub(crate::model::now_millis());
        let _ = jittered_ttl(Duration::from_millis(remaining.max(1)), self.jitter_pct);

        let json = serde_json::to_string(&entry)?;
        self.entries.lock().insert(key.to_string(), json);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, _lock_timeout: Duration) -> CacheResult<LockAttempt<V>> {
        let token = {
            let mut guard = self.locks.lock();
            if guard.contains_key(key) {
                None
            } else {
                let token = Uuid::new_v4().to_string();
                guard.insert(key.to_string(), token.clone());
                Some(token)
            }
        };
        let value = self.get(key).await?;
        Ok(LockAttempt { token, value })
    }

    async fn release_lock(&self, key: &str, token: &str) -> CacheResult<()> {
        let mut guard = self.locks.lock();
        if guard.get(key).map(|t| t.as_str()) == Some(token) {
            guard.remove(key);
        }
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        Ok(())
    }
}

/// Convenience alias used by the facade when it needs to hold a shared,
/// dynamically-dispatched far cache.
pub type SharedFarCache<V> = Arc<dyn FarCache<V>>;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// §4.9: the jittered TTL always lands in `[base*0.70, base*1.30]`
        /// (clamped to a 1ms floor), regardless of `jitter_pct` — the spread
        /// is fixed by the `[0.10, 0.30]` magnitude draw, not by the config.
        #[test]
        fn jittered_ttl_stays_within_its_fixed_spread(
            base_millis in 1u64..=86_400_000u64,
            jitter_pct in 0u8..=100u8,
        ) {
            let base = Duration::from_millis(base_millis);
            let jittered = jittered_ttl(base, jitter_pct);

            let lower = ((base_millis as f64) * 0.70).max(1.0) as u64;
            let upper = ((base_millis as f64) * 1.30).max(1.0) as u64;

            prop_assert!(jittered.as_millis() as u64 >= lower);
            prop_assert!(jittered.as_millis() as u64 <= upper);
        }
    }

    #[tokio::test]
    async fn second_lock_attempt_is_rejected_until_released() {
        let far: InMemoryFarCache<String> = InMemoryFarCache::default();
        let token = far
            .acquire_lock("user:1", Duration::from_secs(3))
            .await
            .unwrap()
            .token
            .expect("first caller should win the lock");

        let second = far.acquire_lock("user:1", Duration::from_secs(3)).await.unwrap();
        assert!(second.token.is_none());

        far.release_lock("user:1", &token).await.unwrap();
        let third = far.acquire_lock("user:1", Duration::from_secs(3)).await.unwrap();
        assert!(third.token.is_some());
    }

    #[tokio::test]
    async fn release_with_wrong_token_is_a_noop() {
        let far: InMemoryFarCache<String> = InMemoryFarCache::default();
        let _token = far
            .acquire_lock("user:1", Duration::from_secs(3))
            .await
            .unwrap()
            .token
            .unwrap();

        far.release_lock("user:1", "not-the-real-token").await.unwrap();
        let still_locked = far.acquire_lock("user:1", Duration::from_secs(3)).await.unwrap();
        assert!(still_locked.token.is_none());
    }

    #[tokio::test]
    async fn lock_attempt_returns_the_cached_value_alongside_the_outcome() {
        let far: InMemoryFarCache<String> = InMemoryFarCache::default();
        let entry = Entry::positive("value".to_string(), Duration::from_secs(10), false);
        far.put_with_random_ttl("user:1", entry).await.unwrap();

        let attempt = far.acquire_lock("user:1", Duration::from_secs(3)).await.unwrap();
        assert!(attempt.token.is_some());
        assert_eq!(attempt.value.unwrap().payload, Some("value".to_string()));
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let far: InMemoryFarCache<String> = InMemoryFarCache::default();
        let entry = Entry::positive("value".to_string(), Duration::from_secs(10), false);
        far.put_with_random_ttl("key", entry).await.unwrap();

        let fetched: Option<Entry<String>> = far.get("key").await.unwrap();
        assert_eq!(fetched.unwrap().payload, Some("value".to_string()));
    }
}
