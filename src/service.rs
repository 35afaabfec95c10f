//! The cache store: envelope reads and writes, tag indexes and invalidation.
//!
//! Every method here fails open. Store errors and timeouts are logged and
//! turned into a miss, a no-op or a zero count, so a broken cache can never
//! break the caller's primary path.

use futures::future::{BoxFuture, join_all};
use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::{BoxError, CacheError};
use crate::metrics::CacheStats;
use crate::store::KvStore;
use crate::utils::{build_cache_key, duration_ms, now_ms, parse_info};

/// Options for writing a cache entry.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Time to live. Falls back to `CacheConfig::default_ttl`.
    pub ttl: Option<Duration>,
    /// Tags the key is indexed under for `invalidate_by_tag`.
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        SetOptions {
            ttl: Some(ttl),
            tags: Vec::new(),
        }
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

type WarmupFetch = Box<dyn FnOnce() -> BoxFuture<'static, Result<serde_json::Value, BoxError>> + Send>;

/// One explicit key for [`ApiCacheService::warmup`].
pub struct WarmupEntry {
    key: String,
    fetch: WarmupFetch,
    options: SetOptions,
}

impl WarmupEntry {
    /// # Example
    /// ```ignore
    /// WarmupEntry::new("api_cache:/categories", || async { db.categories().await }, SetOptions::default())
    /// ```
    pub fn new<F, Fut, T, E>(key: impl Into<String>, fetch: F, options: SetOptions) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize,
        E: Into<BoxError>,
    {
        let fetch: WarmupFetch = Box::new(move || {
            Box::pin(async move {
                let value = fetch().await.map_err(Into::into)?;
                serde_json::to_value(value).map_err(BoxError::from)
            })
        });

        WarmupEntry {
            key: key.into(),
            fetch,
            options,
        }
    }
}

/// Owner of all durable cache state, delegated to a [`KvStore`].
pub struct ApiCacheService {
    store: Arc<dyn KvStore>,
    config: CacheConfig,
}

impl ApiCacheService {
    pub fn new(store: Arc<dyn KvStore>, config: CacheConfig) -> Self {
        ApiCacheService { store, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Build the cache key for an endpoint call.
    ///
    /// Pure and deterministic: parameter order never changes the key.
    ///
    /// # Example
    /// ```ignore
    /// let key = cache.generate_cache_key("/products", Some(&json!({"page": 1})), Some("42"))?;
    /// assert_eq!(key, r#"api_cache:/products:user:42:{"page":1}"#);
    /// ```
    pub fn generate_cache_key<P: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        params: Option<&P>,
        user_id: Option<&str>,
    ) -> Result<String, CacheError> {
        build_cache_key(&self.config.key_prefix, endpoint, params, user_id)
    }

    /// Return the cached value, or `None` on a miss, an expired envelope or
    /// any store failure.
    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        self.get_entry(key).await.map(|entry| entry.value)
    }

    /// Return the full envelope stored under `key`.
    ///
    /// Unreadable or expired envelopes are deleted and reported as a miss.
    pub async fn get_entry<V: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<V>> {
        let raw = match self.kv("GET", key, self.store.get(key)).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!("Cache get failed, treating as miss: key={}, error={}", key, e);
                return None;
            }
        };

        let entry: CacheEntry<V> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Dropping unreadable cache entry: key={}, error={}", key, e);
                self.delete(key).await;
                return None;
            }
        };

        if entry.is_expired(now_ms()) {
            tracing::debug!("Lazily expiring cache entry: key={}", key);
            self.delete(key).await;
            return None;
        }

        Some(entry)
    }

    /// Write `value` under `key` and index it under each tag.
    ///
    /// Errors are logged and swallowed. The tag index updates are independent
    /// of the entry write; a failed index update only weakens tag
    /// invalidation for this key.
    pub async fn set<V: Serialize + ?Sized>(&self, key: &str, value: &V, options: SetOptions) {
        let ttl = options.ttl.unwrap_or(self.config.default_ttl);
        let entry = CacheEntry::new(value, now_ms(), duration_ms(ttl), options.tags);

        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Cache set skipped, value not serializable: key={}, error={}", key, e);
                return;
            }
        };

        if let Err(e) = self.kv("SETEX", key, self.store.set_ex(key, &json, ttl)).await {
            tracing::warn!("Cache set failed: key={}, error={}", key, e);
            return;
        }

        join_all(entry.tags.iter().map(|tag| self.index_tag(tag, key, ttl))).await;
    }

    async fn index_tag(&self, tag: &str, key: &str, ttl: Duration) {
        let tag_key = self.tag_key(tag);

        if let Err(e) = self.kv("SADD", &tag_key, self.store.sadd(&tag_key, key)).await {
            tracing::warn!("Tag index update failed: tag={}, key={}, error={}", tag, key, e);
            return;
        }

        // Only ever extend the index lifetime; it may cover longer-lived keys.
        let remaining = self
            .kv("PTTL", &tag_key, self.store.ttl(&tag_key))
            .await
            .unwrap_or(None);
        if remaining.is_some_and(|remaining| remaining >= ttl) {
            return;
        }

        if let Err(e) = self.kv("EXPIRE", &tag_key, self.store.expire(&tag_key, ttl)).await {
            tracing::warn!("Tag index expiry failed: tag={}, error={}", tag, e);
        }
    }

    /// Remove a single key. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> bool {
        let keys = [key.to_string()];
        match self.kv("DEL", key, self.store.del(&keys)).await {
            Ok(removed) => removed > 0,
            Err(e) => {
                tracing::warn!("Cache delete failed: key={}, error={}", key, e);
                false
            }
        }
    }

    /// Delete every key matching `{key_prefix}{pattern}` (Redis glob syntax).
    ///
    /// Returns the number of keys removed, 0 on error.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let full_pattern = format!("{}{}", self.config.key_prefix, pattern);

        let keys = match self.kv("KEYS", &full_pattern, self.store.keys(&full_pattern)).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Pattern invalidation failed: pattern={}, error={}", full_pattern, e);
                return 0;
            }
        };
        if keys.is_empty() {
            return 0;
        }

        match self.kv("DEL", &full_pattern, self.store.del(&keys)).await {
            Ok(removed) => {
                tracing::debug!("Invalidated {} keys for pattern {}", removed, full_pattern);
                removed
            }
            Err(e) => {
                tracing::warn!("Pattern invalidation failed: pattern={}, error={}", full_pattern, e);
                0
            }
        }
    }

    /// Delete every key listed under `tag`, then the tag index itself.
    ///
    /// Listed keys that already expired are ignored; the returned count only
    /// includes keys that were actually removed.
    pub async fn invalidate_by_tag(&self, tag: &str) -> usize {
        let tag_key = self.tag_key(tag);

        let keys = match self.kv("SMEMBERS", &tag_key, self.store.smembers(&tag_key)).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Tag invalidation failed: tag={}, error={}", tag, e);
                return 0;
            }
        };

        let removed = if keys.is_empty() {
            0
        } else {
            match self.kv("DEL", &tag_key, self.store.del(&keys)).await {
                Ok(removed) => removed,
                Err(e) => {
                    tracing::warn!("Tag invalidation failed: tag={}, error={}", tag, e);
                    return 0;
                }
            }
        };

        self.delete(&tag_key).await;
        tracing::debug!("Invalidated {} keys for tag {}", removed, tag);
        removed
    }

    /// Remaining store-level TTL of `key`, `None` if unknown.
    pub async fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        match self.kv("PTTL", key, self.store.ttl(key)).await {
            Ok(remaining) => remaining,
            Err(e) => {
                tracing::warn!("Cache TTL lookup failed: key={}, error={}", key, e);
                None
            }
        }
    }

    /// Populate explicit keys all at once. Failed fetches are logged and skipped.
    pub async fn warmup(&self, entries: Vec<WarmupEntry>) {
        tracing::info!("Warming up {} cache entries", entries.len());

        join_all(entries.into_iter().map(|entry| async move {
            let WarmupEntry {
                key,
                fetch,
                options,
            } = entry;

            match self.call_origin("warmup fetch", &key, fetch()).await {
                Ok(value) => {
                    self.set(&key, &value, options).await;
                    tracing::debug!("Cached: {}", key);
                }
                Err(e) => tracing::warn!("Failed to warm cache: key={}, error={}", key, e),
            }
        }))
        .await;

        tracing::info!("Cache warmup completed");
    }

    /// Key count under the cache prefix and the store's human-readable memory usage.
    pub async fn stats(&self) -> CacheStats {
        let pattern = format!("{}*", self.config.key_prefix);

        let total_keys = match self.kv("KEYS", &pattern, self.store.keys(&pattern)).await {
            Ok(keys) => keys.len(),
            Err(e) => {
                tracing::warn!("Failed to get cache stats: error={}", e);
                return CacheStats::default();
            }
        };

        let memory_usage = match self.kv("INFO", "memory", self.store.info("memory")).await {
            Ok(info) => parse_info(&info).remove("used_memory_human"),
            Err(e) => {
                tracing::warn!("Failed to read store memory info: error={}", e);
                None
            }
        };

        CacheStats {
            total_keys,
            memory_usage: memory_usage.unwrap_or_else(|| CacheStats::UNKNOWN.to_string()),
        }
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}{}", self.config.tag_prefix, tag)
    }

    /// Run a store command under the configured store timeout.
    pub(crate) async fn kv<T>(
        &self,
        command: &str,
        key: &str,
        fut: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        let limit = self.config.kv_timeout;
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| CacheError::timeout(command, key, limit.as_millis() as u64))?
    }

    /// Run a caller-supplied fetch or persist call under the origin timeout.
    pub(crate) async fn call_origin<T, E>(
        &self,
        operation: &str,
        key: &str,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<T, CacheError>
    where
        E: Into<BoxError>,
    {
        let limit = self.config.origin_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::origin(key, e)),
            Err(_) => Err(CacheError::timeout(operation, key, limit.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::MemoryKvStore;
    use serde_json::json;

    fn service() -> (Arc<MemoryKvStore>, ApiCacheService) {
        let store = Arc::new(MemoryKvStore::default());
        let service = ApiCacheService::new(store.clone(), CacheConfig::default());
        (store, service)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (_, cache) = service();

        cache
            .set("api_cache:/a", &json!({"id": 1}), SetOptions::with_ttl(Duration::from_secs(5)))
            .await;

        let value: Option<serde_json::Value> = cache.get("api_cache:/a").await;
        assert_eq!(value, Some(json!({"id": 1})));
    }

    #[tokio::test]
    async fn test_envelope_records_ttl_and_tags() {
        let (_, cache) = service();
        cache
            .set(
                "k",
                "v",
                SetOptions::with_ttl(Duration::from_secs(10)).tags(["products"]),
            )
            .await;

        let entry: CacheEntry<String> = cache.get_entry("k").await.unwrap();
        assert_eq!(entry.value, "v");
        assert_eq!(entry.max_age_ms(), 10_000);
        assert_eq!(entry.tags, vec!["products".to_string()]);
    }

    #[tokio::test]
    async fn test_default_ttl_applies() {
        let (store, cache) = service();
        cache.set("k", &1, SetOptions::default()).await;

        let remaining = store.ttl("k").await.unwrap().unwrap();
        assert!(remaining > Duration::from_secs(299));
        assert!(remaining <= Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_deleted() {
        let (store, cache) = service();
        store
            .set_ex("k", "not json", Duration::from_secs(5))
            .await
            .unwrap();

        assert!(cache.get::<String>("k").await.is_none());
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_envelope_is_deleted_before_store_evicts() {
        let (store, cache) = service();
        let stale = CacheEntry::new("old", now_ms() - 10_000, 1_000, vec![]);
        store
            .set_ex("k", &serde_json::to_string(&stale).unwrap(), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(cache.get::<String>("k").await.is_none());
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tag_index_expiry_only_grows() {
        let (store, cache) = service();
        cache
            .set("a", &1, SetOptions::with_ttl(Duration::from_secs(100)).tags(["t"]))
            .await;
        cache
            .set("b", &2, SetOptions::with_ttl(Duration::from_secs(5)).tags(["t"]))
            .await;

        let remaining = store.ttl("tag:t").await.unwrap().unwrap();
        assert!(remaining > Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_invalidate_pattern_uses_prefix() {
        let (store, cache) = service();
        cache.set("api_cache:/products:1", &1, SetOptions::default()).await;
        cache.set("api_cache:/products:2", &2, SetOptions::default()).await;
        cache.set("api_cache:/orders:1", &3, SetOptions::default()).await;
        store
            .set_ex("other:/products:1", "x", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(cache.invalidate_pattern("/products:*").await, 2);
        assert!(cache.get::<i32>("api_cache:/products:1").await.is_none());
        assert_eq!(cache.get::<i32>("api_cache:/orders:1").await, Some(3));
        assert!(store.get("other:/products:1").await.unwrap().is_some());

        assert_eq!(cache.invalidate_pattern("/nothing*").await, 0);
    }

    #[tokio::test]
    async fn test_invalidate_by_tag_ignores_vanished_keys() {
        let (store, cache) = service();
        cache.set("k1", &1, SetOptions::default().tags(["t"])).await;
        cache.set("k2", &2, SetOptions::default().tags(["t", "u"])).await;
        store.del(&["k1".to_string()]).await.unwrap();

        assert_eq!(cache.invalidate_by_tag("t").await, 1);
        assert!(cache.get::<i32>("k2").await.is_none());
        assert!(store.smembers("tag:t").await.unwrap().is_empty());

        // The other tag still lists k2, which is already gone
        assert_eq!(cache.invalidate_by_tag("u").await, 0);
        assert_eq!(cache.invalidate_by_tag("never-used").await, 0);
    }

    #[tokio::test]
    async fn test_generate_cache_key_uses_prefix() {
        let (_, cache) = service();
        let key = cache
            .generate_cache_key("/products", Some(&json!({"b": 1, "a": 2})), Some("42"))
            .unwrap();
        assert_eq!(key, r#"api_cache:/products:user:42:{"a":2,"b":1}"#);
    }

    #[tokio::test]
    async fn test_warmup_skips_failures() {
        let (_, cache) = service();
        cache
            .warmup(vec![
                WarmupEntry::new(
                    "api_cache:/ok",
                    || async { Ok::<_, BoxError>(vec![1, 2, 3]) },
                    SetOptions::default(),
                ),
                WarmupEntry::new(
                    "api_cache:/broken",
                    || async { Err::<i32, _>("db down") },
                    SetOptions::default(),
                ),
            ])
            .await;

        assert_eq!(cache.get::<Vec<i32>>("api_cache:/ok").await, Some(vec![1, 2, 3]));
        assert!(cache.get::<i32>("api_cache:/broken").await.is_none());
    }

    #[tokio::test]
    async fn test_stats() {
        let (_, cache) = service();
        cache.set("api_cache:/a", &1, SetOptions::default().tags(["t"])).await;
        cache.set("api_cache:/b", &2, SetOptions::default()).await;

        let stats = cache.stats().await;
        assert_eq!(stats.total_keys, 2);
        assert_ne!(stats.memory_usage, CacheStats::UNKNOWN);
    }

    /// A store that is down: every command fails, or never answers.
    struct UnavailableStore {
        hang: bool,
    }

    impl UnavailableStore {
        async fn fail<T>(&self, command: &str) -> Result<T, CacheError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err(CacheError::operation("unavailable", command, "connection refused"))
        }
    }

    #[async_trait::async_trait]
    impl KvStore for UnavailableStore {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            self.fail("GET").await
        }

        async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
            self.fail("SETEX").await
        }

        async fn del(&self, _keys: &[String]) -> Result<usize, CacheError> {
            self.fail("DEL").await
        }

        async fn sadd(&self, _set: &str, _member: &str) -> Result<(), CacheError> {
            self.fail("SADD").await
        }

        async fn smembers(&self, _set: &str) -> Result<Vec<String>, CacheError> {
            self.fail("SMEMBERS").await
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, CacheError> {
            self.fail("EXPIRE").await
        }

        async fn ttl(&self, _key: &str) -> Result<Option<Duration>, CacheError> {
            self.fail("PTTL").await
        }

        async fn keys(&self, _pattern: &str) -> Result<Vec<String>, CacheError> {
            self.fail("KEYS").await
        }

        async fn info(&self, _section: &str) -> Result<String, CacheError> {
            self.fail("INFO").await
        }
    }

    fn unavailable(hang: bool) -> ApiCacheService {
        ApiCacheService::new(Arc::new(UnavailableStore { hang }), CacheConfig::default())
    }

    #[tokio::test]
    async fn test_failing_store_degrades_to_miss_and_no_op() {
        let cache = unavailable(false);

        cache
            .set("api_cache:/a", &1, SetOptions::default().tags(["t"]))
            .await;
        assert!(cache.get::<i32>("api_cache:/a").await.is_none());
        assert!(!cache.delete("api_cache:/a").await);
        assert_eq!(cache.invalidate_pattern("*").await, 0);
        assert_eq!(cache.invalidate_by_tag("t").await, 0);
        assert!(cache.remaining_ttl("api_cache:/a").await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.total_keys, 0);
        assert_eq!(stats.memory_usage, CacheStats::UNKNOWN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_store_times_out_after_kv_timeout() {
        let cache = unavailable(true);
        let started = tokio::time::Instant::now();

        assert!(cache.get::<i32>("api_cache:/a").await.is_none());

        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2));
        assert!(waited < Duration::from_secs(3));

        let err = cache
            .kv("GET", "api_cache:/a", cache.store.get("api_cache:/a"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Timeout { after_ms: 2000, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_origin_call_times_out() {
        let (_, cache) = service();

        let result = cache
            .call_origin("fetch", "api_cache:/slow", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, BoxError>(1)
            })
            .await;

        assert!(matches!(
            result,
            Err(CacheError::Timeout { after_ms: 30_000, .. })
        ));
    }
}
