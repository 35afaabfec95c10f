use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::{BoxError, CacheError};
use crate::service::{ApiCacheService, SetOptions};
use crate::utils::duration_ms;

/// Options for a cache-aside read.
#[derive(Debug, Clone)]
pub struct CacheAsideOptions {
    /// Freshness window. Entries older than this are refreshed in the background.
    pub ttl: Duration,
    /// Serve stale entries while refreshing them.
    pub stale_while_revalidate: bool,
    /// Maximum staleness tolerated; entries are written with this TTL.
    pub stale_ttl: Duration,
    /// Tags attached to entries written by this read.
    pub tags: Vec<String>,
}

impl CacheAsideOptions {
    pub fn from_config(config: &CacheConfig) -> Self {
        CacheAsideOptions {
            ttl: config.default_ttl,
            stale_while_revalidate: config.stale_while_revalidate,
            stale_ttl: config.stale_ttl,
            tags: Vec::new(),
        }
    }
}

impl Default for CacheAsideOptions {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Cache-aside reads with stale-while-revalidate.
///
/// `ttl` is the freshness window and `stale_ttl` the maximum staleness
/// tolerated. Once a key has been cached, callers never wait on the origin
/// again until the entry is older than `stale_ttl`: stale hits are served
/// immediately and refreshed off the request path.
#[derive(Clone)]
pub struct CacheAside {
    cache: Arc<ApiCacheService>,
    /// At most one background refresh per key is in flight.
    refreshing: Arc<Mutex<HashSet<String>>>,
}

impl CacheAside {
    pub fn new(cache: Arc<ApiCacheService>) -> Self {
        CacheAside {
            cache,
            refreshing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Get the cached value or load it from origin.
    ///
    /// - Fresh hit: returned as is.
    /// - Stale hit (`ttl <= age < stale_ttl`): returned immediately while
    ///   `load_from_origin` runs in a background task.
    /// - Miss: `load_from_origin` is awaited, its result cached for
    ///   `stale_ttl` and returned. Its failure is the only error surfaced.
    ///
    /// # Arguments
    /// * `key` - The cache key
    /// * `load_from_origin` - Function to load the value (receives the key)
    /// * `options` - Overrides for the configured windows
    ///
    /// # Example
    /// ```ignore
    /// let product = cache_aside.execute("api_cache:/products/7", |key| async move {
    ///     db.product(7).await
    /// }, None).await?;
    /// ```
    pub async fn execute<V, F, Fut, E>(
        &self,
        key: &str,
        load_from_origin: F,
        options: Option<CacheAsideOptions>,
    ) -> Result<V, CacheError>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let options =
            options.unwrap_or_else(|| CacheAsideOptions::from_config(self.cache.config()));

        if let Some(entry) = self.cache.get_entry::<V>(key).await {
            if options.stale_while_revalidate
                && let Some(age) = self.cache_age(key, &entry).await
                && age >= options.ttl
                && age < options.stale_ttl
            {
                tracing::debug!("Serving stale entry, refreshing: key={}, age={:?}", key, age);
                self.spawn_refresh(key, load_from_origin, options);
            }
            return Ok(entry.value);
        }

        let value = self
            .cache
            .call_origin("fetch", key, load_from_origin(key.to_string()))
            .await?;

        self.cache
            .set(key, &value, SetOptions {
                ttl: Some(options.stale_ttl),
                tags: options.tags,
            })
            .await;

        Ok(value)
    }

    /// Time since the entry was written: its max age minus the TTL the store
    /// still reports. `None` when the store cannot tell.
    async fn cache_age<V>(&self, key: &str, entry: &CacheEntry<V>) -> Option<Duration> {
        let remaining = self.cache.remaining_ttl(key).await?;
        let age_ms = entry.max_age_ms() - duration_ms(remaining);
        Some(Duration::from_millis(age_ms.max(0) as u64))
    }

    /// Spawn a background refresh task.
    ///
    /// Failures are logged; the stale entry stays until it expires or a
    /// later refresh succeeds.
    fn spawn_refresh<V, F, Fut, E>(&self, key: &str, load_from_origin: F, options: CacheAsideOptions)
    where
        V: Serialize + Send + Sync + 'static,
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let Some(slot) = RefreshSlot::acquire(&self.refreshing, key) else {
            return;
        };
        let cache = Arc::clone(&self.cache);
        let key = key.to_string();

        tokio::spawn(async move {
            // Released on every exit, including a panicking loader.
            let _slot = slot;

            match cache
                .call_origin("refresh", &key, load_from_origin(key.clone()))
                .await
            {
                Ok(value) => {
                    cache
                        .set(&key, &value, SetOptions {
                            ttl: Some(options.stale_ttl),
                            tags: options.tags,
                        })
                        .await;
                    tracing::debug!("Refreshed stale entry: key={}", key);
                }
                Err(e) => {
                    tracing::warn!("Failed to refresh cache: key={}, error={}", key, e);
                }
            }
        });
    }
}

/// Marks a key as having a refresh in flight until dropped.
struct RefreshSlot {
    refreshing: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl RefreshSlot {
    /// `None` when a refresh for `key` is already running.
    fn acquire(refreshing: &Arc<Mutex<HashSet<String>>>, key: &str) -> Option<Self> {
        let inserted = refreshing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());

        inserted.then(|| RefreshSlot {
            refreshing: Arc::clone(refreshing),
            key: key.to_string(),
        })
    }
}

impl Drop for RefreshSlot {
    fn drop(&mut self) {
        self.refreshing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
