//! The public two-tier cache facade: `get`/`put`/`delete`/`invalidate` and
//! their batch variants (§4.1–§4.5).
//!
//! Shaped like the teacher's `MultiTierCache<K, V>` (`enterprise::cache::tier`):
//! a generic struct over `<K, V>`, `Arc`-wrapped collaborators so it clones
//! cheaply, and a matching `CacheBuilder`. Collaborators are trait objects
//! (`NearCache`, `FarCache`, `DataLoader`) so callers can substitute the
//! in-memory test doubles without touching the facade.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::far::{FarCache, LockAttempt};
use crate::filter::MembershipFilter;
use crate::hotkey::HotKeyDetector;
use crate::key::{DataLoader, KeyCodec};
use crate::metrics::MetricsRecorder;
use crate::model::{CacheEventType, CacheLevel, CacheOperation, Entry};
use crate::near::NearCache;
use crate::retry::{classify_disposition, execute_with_retry, Disposition, RetryConfig};
use crate::scheduler::DelayScheduler;

/// How long after the first (immediate) delete to issue the second delete,
/// closing the write-during-invalidation race (§4.5).
const DOUBLE_DELETE_DELAY: Duration = Duration::from_millis(500);

/// Grace period `close()` gives the delayed-double-delete scheduler to drain
/// in-flight tasks before aborting whatever remains (§5).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How long a caller that lost the single-flight lock waits before re-reading
/// the far cache once (§4.2 step 3). Short on purpose: the lock winner is
/// expected to populate the far cache within milliseconds, and this caller
/// must not itself fall through to the data source on a continued miss.
const LOCK_LOSER_POLL_DELAY: Duration = Duration::from_millis(50);

/// The two-tier cache facade.
pub struct TieredCache<K, V>
where
    K: KeyCodec + Send + Sync + 'static,
    V: Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    near: Arc<dyn NearCache<V>>,
    far: Arc<dyn FarCache<V>>,
    filter: Arc<MembershipFilter>,
    hot_keys: Arc<HotKeyDetector>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsRecorder>,
    loader: Arc<dyn DataLoader<K, V>>,
    scheduler: Arc<DelayScheduler>,
    config: CacheConfig,
    retry: RetryConfig,
}

impl<K, V> TieredCache<K, V>
where
    K: KeyCodec + Send + Sync + 'static,
    V: Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    /// §4.1: read-through get. Order of operations: membership filter,
    /// near cache, far cache (promoting on hit), then the miss path.
    pub async fn get(&self, key: &K) -> CacheResult<Option<V>> {
        let started = Instant::now();
        let key_str = key.key_string();

        let result = self.get_inner(key, &key_str).await;

        self.metrics
            .record_latency(CacheOperation::Get, started.elapsed());
        result
    }

    async fn get_inner(&self, key: &K, key_str: &str) -> CacheResult<Option<V>> {
        // §4.1 step 2: the hot-key tick happens unconditionally, before the
        // membership filter is even consulted — a hammered nonexistent key
        // still needs to show up in the access history.
        self.hot_keys.record_access(key_str);

        if !self.filter.might_contain(key_str) {
            self.metrics.record_event(CacheEventType::Penetration);
            debug!(key = key_str, "membership filter rejected key; skipping load");
            return Ok(None);
        }

        if let Some(entry) = self.near.get(key_str).await {
            self.metrics.record_hit(CacheLevel::L1Near);
            return Ok(Self::materialize(entry));
        }
        self.metrics.record_miss(CacheLevel::L1Near);

        match self.far.get(key_str).await {
            Ok(Some(entry)) => {
                self.metrics.record_hit(CacheLevel::L2Far);
                self.near.put(key_str, entry.clone()).await;
                return Ok(Self::materialize(entry));
            }
            Ok(None) => {
                self.metrics.record_miss(CacheLevel::L2Far);
            }
            Err(err) => {
                warn!(key = key_str, error = %err, "far-cache read failed; treating as miss");
                self.metrics.record_miss(CacheLevel::L2Far);
            }
        }

        if self.hot_keys.is_hot(key_str) {
            self.metrics.record_event(CacheEventType::Breakdown);
            self.load_single_flight(key, key_str).await
        } else {
            self.load_direct(key, key_str).await
        }
    }

    /// §4.2: hot-key path. Acquire the distributed lock before hitting the
    /// data source. A caller that loses the race never calls the data
    /// source itself — at most one `data_loader` call happens per key per
    /// single-flight epoch (§4.1/§8).
    async fn load_single_flight(&self, key: &K, key_str: &str) -> CacheResult<Option<V>> {
        match self.far.acquire_lock(key_str, self.config.far.lock_timeout).await {
            Ok(LockAttempt {
                token: Some(token), ..
            }) => {
                let result = self.load_from_source(key, key_str).await;
                if let Err(err) = self.far.release_lock(key_str, &token).await {
                    warn!(key = key_str, error = %err, "failed to release single-flight lock");
                }
                result
            }
            Ok(LockAttempt { token: None, value }) => {
                // §4.2 step 3: the stale-or-not value returned alongside the
                // lost lock attempt short-circuits the wait when usable.
                if let Some(entry) = value {
                    if !entry.is_stale() {
                        self.near.put(key_str, entry.clone()).await;
                        return Ok(Self::materialize(entry));
                    }
                }

                tokio::time::sleep(LOCK_LOSER_POLL_DELAY).await;
                match self.far.get(key_str).await {
                    Ok(Some(entry)) if !entry.is_stale() => {
                        self.near.put(key_str, entry.clone()).await;
                        Ok(Self::materialize(entry))
                    }
                    _ => Ok(None),
                }
            }
            Err(err) => {
                warn!(key = key_str, error = %err, "lock acquisition failed; loading directly");
                self.load_direct(key, key_str).await
            }
        }
    }

    /// §4.3: direct-load path for non-hot keys — no lock, straight to the
    /// data source behind the circuit breaker.
    async fn load_direct(&self, key: &K, key_str: &str) -> CacheResult<Option<V>> {
        self.load_from_source(key, key_str).await
    }

    /// Shared tail of both miss paths: call the data source through the
    /// circuit breaker and retry policy, then populate both tiers.
    async fn load_from_source(&self, key: &K, key_str: &str) -> CacheResult<Option<V>> {
        let loader = self.loader.clone();
        let metrics = self.metrics.clone();
        let retry = self.retry.clone();

        let outcome: CacheResult<Option<V>> = self
            .breaker
            .execute(
                {
                    let loader = loader.clone();
                    let retry = retry.clone();
                    move || {
                        let loader = loader.clone();
                        let retry = retry.clone();
                        async move {
                            execute_with_retry(&retry, move || {
                                let loader = loader.clone();
                                async move {
                                    loader
                                        .load(key)
                                        .await
                                        .map_err(CacheError::DataSource)
                                }
                            })
                            .await
                        }
                    }
                },
                {
                    let metrics = metrics.clone();
                    let key_str = key_str.to_string();
                    move || async move {
                        metrics.record_event(CacheEventType::CircuitOpen);
                        warn!(key = %key_str, "circuit open; data source not attempted");
                        Err(CacheError::DataSource(
                            "circuit open; data source not attempted".into(),
                        ))
                    }
                },
            )
            .await;

        match outcome {
            Ok(Some(value)) => {
                // §4.3: "call facade put(k, value, default_far_ttl)" — reuse
                // the write-through path itself rather than duplicating its
                // tier-write-plus-filter-insert sequence here.
                self.put(key, value.clone(), Some(self.config.far.default_ttl))
                    .await?;
                Ok(Some(value))
            }
            Ok(None) => {
                // No filter insert for negative keys (§4.3): a penetration
                // guard that remembers "this key doesn't exist" would defeat
                // its own purpose.
                if self.config.negative.enabled {
                    let entry: Entry<V> = Entry::negative(self.config.negative.ttl);
                    self.store_entry(key_str, entry).await;
                }
                Ok(None)
            }
            Err(err) => {
                let disposition = classify_disposition(err.classify());
                if disposition == Disposition::CircuitBreak {
                    debug!(key = key_str, "data-source failure counted toward circuit breaker");
                }
                // §7: a breaker-open or terminal data-source failure is
                // never rethrown to the facade caller — it resolves to
                // absent, the same as any other miss the loader can't fill.
                warn!(key = key_str, error = %err, "data source unavailable; returning absent");
                Ok(None)
            }
        }
    }

    async fn store_entry(&self, key_str: &str, entry: Entry<V>) {
        if let Err(err) = self.far.put_with_random_ttl(key_str, entry.clone()).await {
            warn!(key = key_str, error = %err, "far-cache write failed");
        }
        self.near.put(key_str, entry).await;
    }

    fn materialize(entry: Entry<V>) -> Option<V> {
        if entry.is_stale() {
            None
        } else {
            entry.payload
        }
    }

    /// §4.4: write-through put. `ttl` defaults to the configured far-cache
    /// default when absent. Far cache is written first so a crash between
    /// the two writes never leaves the near cache ahead of the shared
    /// source of truth.
    pub async fn put(&self, key: &K, value: V, ttl: Option<Duration>) -> CacheResult<()> {
        let started = Instant::now();
        let key_str = key.key_string();
        let is_hot = self.hot_keys.is_hot(&key_str);
        let ttl = ttl.unwrap_or(self.config.far.default_ttl);
        let entry = Entry::positive(value, ttl, is_hot);

        // §7: far-cache write failures are logged and swallowed — put is a
        // best-effort write-through and always returns normally.
        if let Err(err) = self.far.put_with_random_ttl(&key_str, entry.clone()).await {
            warn!(key = key_str, error = %err, "far-cache write failed");
        }
        self.near.put(&key_str, entry).await;
        self.filter.insert(&key_str);

        self.metrics
            .record_latency(CacheOperation::Put, started.elapsed());
        Ok(())
    }

    /// §4.5: plain delete from both tiers. Idempotent; unlike `invalidate`,
    /// it does not schedule a second, delayed delete.
    pub async fn delete(&self, key: &K) -> CacheResult<()> {
        let started = Instant::now();
        self.delete_now(&key.key_string()).await?;
        self.metrics
            .record_latency(CacheOperation::Delete, started.elapsed());
        Ok(())
    }

    /// §4.5: delayed double delete. The immediate delete closes the common
    /// race; the scheduled second delete catches a read that was in flight
    /// at the moment of the immediate delete and would otherwise repopulate
    /// the cache with now-stale data read before the authoritative write
    /// committed.
    pub async fn invalidate(&self, key: &K) -> CacheResult<()> {
        let started = Instant::now();
        let key_str = key.key_string();

        self.delete_now(&key_str).await?;

        let near = self.near.clone();
        let far = self.far.clone();
        let delayed_key = key_str.clone();
        self.scheduler
            .schedule_async(DOUBLE_DELETE_DELAY, move || async move {
                near.delete(&delayed_key).await;
                if let Err(err) = far.delete(&delayed_key).await {
                    warn!(key = delayed_key, error = %err, "delayed second delete failed");
                }
            });

        self.metrics
            .record_latency(CacheOperation::Delete, started.elapsed());
        Ok(())
    }

    async fn delete_now(&self, key_str: &str) -> CacheResult<()> {
        self.near.delete(key_str).await;
        if let Err(err) = self.far.delete(key_str).await {
            warn!(key = key_str, error = %err, "far-cache delete failed");
        }
        Ok(())
    }

    /// §6: serial composition of `get`. Absent keys are omitted from the
    /// returned map rather than represented as `None` entries.
    pub async fn multi_get(&self, keys: &[K]) -> CacheResult<std::collections::HashMap<K, V>>
    where
        K: Clone + Eq + std::hash::Hash,
    {
        let mut results = std::collections::HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key).await? {
                results.insert(key.clone(), value);
            }
        }
        Ok(results)
    }

    /// §6: serial composition of `put`, sharing one `ttl` across the batch.
    pub async fn multi_put(&self, entries: Vec<(K, V)>, ttl: Option<Duration>) -> CacheResult<()> {
        for (key, value) in entries {
            self.put(&key, value, ttl).await?;
        }
        Ok(())
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    /// Stops the delayed-double-delete scheduler (waiting up to a 5 s grace
    /// for in-flight deletes before aborting stragglers), clears the near
    /// cache, and closes the far-cache connection (§5, §6).
    pub async fn close(&self) -> CacheResult<()> {
        self.scheduler.shutdown(SHUTDOWN_GRACE).await;
        let (_, far_result) = futures::join!(self.near.clear(), self.far.close());
        far_result
    }
}

/// Builder for `TieredCache`, mirroring the teacher's config-then-build
/// pattern (`EnterpriseConfig`/`TierConfig` constructors).
pub struct CacheBuilder<K, V>
where
    K: KeyCodec + Send + Sync + 'static,
    V: Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    near: Option<Arc<dyn NearCache<V>>>,
    far: Option<Arc<dyn FarCache<V>>>,
    loader: Option<Arc<dyn DataLoader<K, V>>>,
    config: CacheConfig,
    retry: RetryConfig,
}

impl<K, V> Default for CacheBuilder<K, V>
where
    K: KeyCodec + Send + Sync + 'static,
    V: Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            near: None,
            far: None,
            loader: None,
            config: CacheConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: KeyCodec + Send + Sync + 'static,
    V: Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn near(mut self, near: Arc<dyn NearCache<V>>) -> Self {
        self.near = Some(near);
        self
    }

    pub fn far(mut self, far: Arc<dyn FarCache<V>>) -> Self {
        self.far = Some(far);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn DataLoader<K, V>>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> CacheResult<TieredCache<K, V>> {
        self.config.validate()?;

        let near = self
            .near
            .ok_or_else(|| CacheError::Config("near cache collaborator is required".into()))?;
        let far = self
            .far
            .ok_or_else(|| CacheError::Config("far cache collaborator is required".into()))?;
        let loader = self
            .loader
            .ok_or_else(|| CacheError::Config("data loader collaborator is required".into()))?;

        Ok(TieredCache {
            near,
            far,
            filter: Arc::new(MembershipFilter::new(&self.config.filter)),
            hot_keys: Arc::new(HotKeyDetector::new(&self.config.hot_key)),
            breaker: Arc::new(CircuitBreaker::new(&self.config.breaker)),
            metrics: Arc::new(MetricsRecorder::new()),
            loader,
            scheduler: Arc::new(DelayScheduler::new()),
            config: self.config,
            retry: self.retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::far::InMemoryFarCache;
    use crate::near::MokaNearCache;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingLoader {
        calls: AtomicU32,
        value: Option<String>,
    }

    #[async_trait]
    impl DataLoader<String, String> for CountingLoader {
        async fn load(&self, _key: &String) -> Result<Option<String>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value.clone())
        }
    }

    fn build_cache(
        loader: CountingLoader,
    ) -> TieredCache<String, String> {
        CacheBuilder::new()
            .near(Arc::new(MokaNearCache::new(&CacheConfig::default().near)))
            .far(Arc::new(InMemoryFarCache::default()))
            .loader(Arc::new(loader))
            .build()
            .expect("valid builder configuration")
    }

    #[tokio::test]
    async fn cold_get_loads_from_source_then_warms_both_tiers() {
        let loader = CountingLoader {
            calls: AtomicU32::new(0),
            value: Some("value-1".to_string()),
        };
        let cache = build_cache(loader);

        let first = cache.get(&"user:1".to_string()).await.unwrap();
        assert_eq!(first, Some("value-1".to_string()));

        let second = cache.get(&"user:1".to_string()).await.unwrap();
        assert_eq!(second, Some("value-1".to_string()));
        assert_eq!(cache.metrics().hit_count(CacheLevel::L1Near), 1);
    }

    #[tokio::test]
    async fn missing_value_is_negatively_cached() {
        let loader = CountingLoader {
            calls: AtomicU32::new(0),
            value: None,
        };
        let cache = build_cache(loader);

        let result = cache.get(&"absent".to_string()).await.unwrap();
        assert_eq!(result, None);

        let second = cache.near.get("absent").await;
        assert!(second.is_some());
        assert!(second.unwrap().is_negative);
    }

    #[tokio::test]
    async fn put_then_get_reads_back_the_written_value() {
        let loader = CountingLoader {
            calls: AtomicU32::new(0),
            value: None,
        };
        let cache = build_cache(loader);

        cache
            .put(&"user:2".to_string(), "written".to_string(), None)
            .await
            .unwrap();
        let result = cache.get(&"user:2".to_string()).await.unwrap();
        assert_eq!(result, Some("written".to_string()));
    }

    #[tokio::test]
    async fn delete_removes_value_from_both_tiers_immediately() {
        let loader = CountingLoader {
            calls: AtomicU32::new(0),
            value: Some("value".to_string()),
        };
        let cache = build_cache(loader);

        cache.put(&"user:3".to_string(), "value".to_string(), None).await.unwrap();
        cache.delete(&"user:3".to_string()).await.unwrap();

        assert!(cache.near.get("user:3").await.is_none());
    }
}
