//! Near-cache (L1) trait and the default `moka`-backed implementation (§6).

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::config::NearConfig;
use crate::model::Entry;

/// The near-cache contract: a process-local, read-through-agnostic store of
/// `Entry<V>` values keyed by their canonical string form.
///
/// Modeled on the teacher's `BackingStore`-style collaborator traits
/// (`enterprise::cache::strategy`): one trait, `async_trait`-ified for
/// object safety, implementations swappable behind `Arc<dyn NearCache<V>>`.
#[async_trait]
pub trait NearCache<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<Entry<V>>;
    async fn put(&self, key: &str, entry: Entry<V>);
    async fn delete(&self, key: &str);
    async fn clear(&self);
    fn size(&self) -> u64;
}

/// Default near-cache, backed by `moka::future::Cache`.
///
/// `moka` owns eviction (size-based, TTL-based) and statistics internally;
/// this adapter only translates between the crate's `Entry<V>` model and
/// moka's get/insert/invalidate calls.
pub struct MokaNearCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<String, Arc<Entry<V>>>,
}

impl<V> MokaNearCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: &NearConfig) -> Self {
        let inner = Cache::builder()
            .max_capacity(config.max_size)
            .time_to_live(config.default_ttl)
            .build();
        Self { inner }
    }
}

#[async_trait]
impl<V> NearCache<V> for MokaNearCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<Entry<V>> {
        self.inner
            .get(key)
            .await
            .map(|arc_entry| (*arc_entry).clone())
    }

    async fn put(&self, key: &str, entry: Entry<V>) {
        self.inner.insert(key.to_string(), Arc::new(entry)).await;
    }

    async fn delete(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    async fn clear(&self) {
        self.inner.invalidate_all();
        // moka applies invalidate_all lazily; run_pending_tasks flushes it
        // so `size()` reflects the clear immediately after awaiting this call.
        self.inner.run_pending_tasks().await;
    }

    fn size(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NearConfig {
        NearConfig {
            max_size: 100,
            default_ttl: Duration::from_secs(60),
            record_stats: true,
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache: MokaNearCache<String> = MokaNearCache::new(&config());
        let entry = Entry::positive("value".to_string(), Duration::from_secs(10), false);
        cache.put("key", entry).await;

        let fetched = cache.get("key").await.expect("entry should be present");
        assert_eq!(fetched.payload, Some("value".to_string()));
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let cache: MokaNearCache<String> = MokaNearCache::new(&config());
        assert!(cache.get("absent").await.is_none());
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache: MokaNearCache<String> = MokaNearCache::new(&config());
        cache
            .put(
                "key",
                Entry::positive("value".to_string(), Duration::from_secs(10), false),
            )
            .await;
        cache.delete("key").await;
        assert!(cache.get("key").await.is_none());
    }

    #[tokio::test]
    async fn clear_empties_cache() {
        let cache: MokaNearCache<String> = MokaNearCache::new(&config());
        cache
            .put(
                "key",
                Entry::positive("value".to_string(), Duration::from_secs(10), false),
            )
            .await;
        cache.clear().await;
        assert_eq!(cache.size(), 0);
    }
}
