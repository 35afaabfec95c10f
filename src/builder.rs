//! Builder API for the caching facade.
//!
//! Route handlers talk to a single [`CacheStrategies`] value that bundles the
//! cache store, every strategy, the warmer and the metrics collector over one
//! shared KV store.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::error::{BoxError, CacheError};
use crate::expander::{KeyPatternExpander, PlaceholderExpander, StaticCandidates};
use crate::metrics::{CacheMetrics, MetricsCollector};
use crate::service::ApiCacheService;
use crate::store::KvStore;
use crate::stores::metrics::{InstrumentedStore, LatencyRecorder};
use crate::strategies::{CacheAside, CacheAsideOptions, WriteBehind, WriteThrough};
use crate::warmer::{CacheWarmer, WarmSummary, WarmingPattern};

/// Builder for [`CacheStrategies`].
///
/// # Example
///
/// ```ignore
/// use response_cache::{CacheStrategiesBuilder, CacheConfig, RedisKvStore, RedisKvStoreConfig};
/// use std::sync::Arc;
///
/// let redis = RedisKvStore::new(RedisKvStoreConfig::default()).await?;
///
/// let cache = CacheStrategiesBuilder::new(Arc::new(redis))
///     .config(CacheConfig::from_env())
///     .instrumented()
///     .build();
///
/// let products = cache
///     .cache_aside("api_cache:/api/products", |_key| async { db.products().await }, None)
///     .await?;
/// ```
pub struct CacheStrategiesBuilder {
    store: Arc<dyn KvStore>,
    config: CacheConfig,
    expander: Option<Arc<dyn KeyPatternExpander>>,
    instrumented: bool,
}

impl CacheStrategiesBuilder {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        CacheStrategiesBuilder {
            store,
            config: CacheConfig::default(),
            expander: None,
            instrumented: false,
        }
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Expander used by `warm_cache`. Defaults to a [`PlaceholderExpander`]
    /// with no candidates, so placeholder patterns warm nothing.
    pub fn expander(mut self, expander: Arc<dyn KeyPatternExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    /// Record KV command latencies and report their average in `get_metrics`.
    pub fn instrumented(mut self) -> Self {
        self.instrumented = true;
        self
    }

    pub fn build(self) -> CacheStrategies {
        let (store, latency) = if self.instrumented {
            let recorder = Arc::new(LatencyRecorder::new());
            let store: Arc<dyn KvStore> = Arc::new(InstrumentedStore::new(self.store, recorder.clone()));
            (store, Some(recorder))
        } else {
            (self.store, None)
        };

        let expander = self.expander.unwrap_or_else(|| {
            Arc::new(PlaceholderExpander::new(Arc::new(StaticCandidates::default())))
        });

        tracing::debug!(
            "Building cache strategies: store={}, prefix={}, instrumented={}",
            store.name(),
            self.config.key_prefix,
            latency.is_some()
        );

        let cache = Arc::new(ApiCacheService::new(store, self.config));
        let mut metrics = MetricsCollector::new(cache.clone());
        if let Some(recorder) = latency {
            metrics = metrics.with_latency(recorder);
        }

        CacheStrategies {
            cache_aside: CacheAside::new(cache.clone()),
            write_through: WriteThrough::new(cache.clone()),
            warmer: CacheWarmer::new(cache.clone(), expander),
            metrics,
            cache,
        }
    }
}

/// The caching facade.
pub struct CacheStrategies {
    cache: Arc<ApiCacheService>,
    cache_aside: CacheAside,
    write_through: WriteThrough,
    warmer: CacheWarmer,
    metrics: MetricsCollector,
}

impl CacheStrategies {
    /// The underlying cache store, for direct `get`/`set`/`delete`.
    pub fn cache(&self) -> &Arc<ApiCacheService> {
        &self.cache
    }

    /// See [`CacheAside::execute`].
    pub async fn cache_aside<V, F, Fut, E>(
        &self,
        key: &str,
        fetch: F,
        options: Option<CacheAsideOptions>,
    ) -> Result<V, CacheError>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.cache_aside.execute(key, fetch, options).await
    }

    /// See [`WriteThrough::execute`].
    pub async fn write_through<V, F, Fut, E>(
        &self,
        key: &str,
        data: V,
        persist: F,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>
    where
        V: Serialize + Clone,
        F: FnOnce(V) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<BoxError>,
    {
        self.write_through.execute(key, data, persist, ttl).await
    }

    /// A new, independent write-behind queue. Unset arguments fall back to
    /// `flush_interval` and `max_batch_size` from the config.
    pub fn create_write_behind<V>(
        &self,
        flush_interval: Option<Duration>,
        max_batch_size: Option<usize>,
    ) -> WriteBehind<V>
    where
        V: Serialize + Clone + Send + Sync + 'static,
    {
        let config = self.cache.config();
        WriteBehind::new(
            self.cache.clone(),
            flush_interval.unwrap_or(config.flush_interval),
            max_batch_size.unwrap_or(config.max_batch_size),
        )
    }

    pub async fn warm_cache(&self, patterns: Vec<WarmingPattern>) -> WarmSummary {
        self.warmer.warm_cache(patterns).await
    }

    pub async fn get_metrics(&self) -> CacheMetrics {
        self.metrics.get_metrics().await
    }

    pub async fn invalidate_by_tag(&self, tag: &str) -> usize {
        self.cache.invalidate_by_tag(tag).await
    }

    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        self.cache.invalidate_pattern(pattern).await
    }
}
