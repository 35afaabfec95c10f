//! Proactive cache population.
//!
//! Patterns are processed one at a time in descending priority. Each pattern
//! is expanded into keys and the keys are fetched in fixed-size batches, so
//! at most `concurrency_limit` origin calls run at once.

use futures::future::{BoxFuture, join_all};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BoxError;
use crate::expander::KeyPatternExpander;
use crate::service::{ApiCacheService, SetOptions};

type PatternFetch = Arc<dyn Fn(String) -> BoxFuture<'static, Result<serde_json::Value, BoxError>> + Send + Sync>;

/// A templated key plus how to load the value for each concrete key.
#[derive(Clone)]
pub struct WarmingPattern {
    key_pattern: String,
    fetch: PatternFetch,
    ttl: Option<Duration>,
    priority: i32,
    tags: Vec<String>,
}

impl WarmingPattern {
    /// # Example
    /// ```ignore
    /// WarmingPattern::new("product:{productId}", |key| async move { db.product_for(&key).await })
    ///     .ttl(Duration::from_secs(600))
    ///     .priority(10)
    /// ```
    pub fn new<F, Fut, T, E>(key_pattern: impl Into<String>, fetch: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize,
        E: Into<BoxError>,
    {
        let fetch: PatternFetch = Arc::new(move |key| {
            let fut = fetch(key);
            Box::pin(async move {
                let value = fut.await.map_err(Into::into)?;
                serde_json::to_value(value).map_err(BoxError::from)
            })
        });

        WarmingPattern {
            key_pattern: key_pattern.into(),
            fetch,
            ttl: None,
            priority: 0,
            tags: Vec::new(),
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Higher runs first.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn key_pattern(&self) -> &str {
        &self.key_pattern
    }

    fn set_options(&self) -> SetOptions {
        SetOptions {
            ttl: self.ttl,
            tags: self.tags.clone(),
        }
    }
}

/// Outcome of one [`CacheWarmer::warm_cache`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmSummary {
    /// Patterns whose expansion succeeded.
    pub patterns: usize,
    /// Keys written to the cache.
    pub keys: usize,
    /// Failed expansions plus failed fetches.
    pub failures: usize,
}

pub struct CacheWarmer {
    cache: Arc<ApiCacheService>,
    expander: Arc<dyn KeyPatternExpander>,
    concurrency_limit: usize,
}

impl CacheWarmer {
    pub fn new(cache: Arc<ApiCacheService>, expander: Arc<dyn KeyPatternExpander>) -> Self {
        let concurrency_limit = cache.config().concurrency_limit;
        CacheWarmer {
            cache,
            expander,
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    /// Warm every pattern, highest priority first (input order among equals).
    ///
    /// Expansion and fetch failures are logged and counted; they never stop
    /// the run.
    pub async fn warm_cache(&self, mut patterns: Vec<WarmingPattern>) -> WarmSummary {
        tracing::info!("Starting cache warm-up for {} patterns", patterns.len());
        patterns.sort_by_key(|p| std::cmp::Reverse(p.priority));

        let mut summary = WarmSummary::default();
        for pattern in &patterns {
            let keys = match self.expander.expand(&pattern.key_pattern).await {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::warn!(
                        "Failed to expand warm-up pattern: pattern={}, error={}",
                        pattern.key_pattern,
                        e
                    );
                    summary.failures += 1;
                    continue;
                }
            };

            let (warmed, failed) = self.warm_keys(pattern, &keys).await;
            summary.patterns += 1;
            summary.keys += warmed;
            summary.failures += failed;

            tracing::info!("Warmed {} keys for pattern: {}", warmed, pattern.key_pattern);
        }

        tracing::info!(
            "Cache warm-up completed: patterns={}, keys={}, failures={}",
            summary.patterns,
            summary.keys,
            summary.failures
        );
        summary
    }

    async fn warm_keys(&self, pattern: &WarmingPattern, keys: &[String]) -> (usize, usize) {
        let options = pattern.set_options();
        let mut warmed = 0;
        let mut failed = 0;

        for batch in keys.chunks(self.concurrency_limit) {
            let results = join_all(batch.iter().map(|key| {
                let options = options.clone();
                async move {
                    match self
                        .cache
                        .call_origin("warm fetch", key, (pattern.fetch)(key.clone()))
                        .await
                    {
                        Ok(value) => {
                            self.cache.set(key, &value, options).await;
                            true
                        }
                        Err(e) => {
                            tracing::warn!("Failed to warm cache: key={}, error={}", key, e);
                            false
                        }
                    }
                }
            }))
            .await;

            for ok in results {
                if ok {
                    warmed += 1;
                } else {
                    failed += 1;
                }
            }
        }

        (warmed, failed)
    }
}
