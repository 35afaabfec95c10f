//! response-cache - A response caching layer over a Redis-compatible store
//!
//! This library provides:
//! - A fail-open cache store with TTLs and tag-based invalidation
//! - Cache-aside reads with stale-while-revalidate background refresh
//! - Write-through and batched write-behind writes
//! - Priority-ordered, concurrency-bounded cache warming
//! - Hit/miss/eviction metrics from the store's `INFO` output
//!
//! # Example
//!
//! ```ignore
//! use response_cache::{CacheStrategiesBuilder, MemoryKvStore, SetOptions};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = CacheStrategiesBuilder::new(Arc::new(MemoryKvStore::default())).build();
//!
//!     // Cache-aside - the loader receives the cache key
//!     let user: String = cache
//!         .cache_aside("api_cache:/users/123", |key| async move {
//!             Ok::<_, std::io::Error>(format!("User data for {}", key))
//!         }, None)
//!         .await
//!         .unwrap();
//!
//!     // Tagged entries can be dropped together
//!     cache
//!         .cache()
//!         .set("api_cache:/products/7", &user, SetOptions::with_ttl(Duration::from_secs(60)).tags(["products"]))
//!         .await;
//!     cache.invalidate_by_tag("products").await;
//! }
//! ```

mod builder;
mod config;
mod entry;
mod error;
mod expander;
mod metrics;
mod service;
mod store;
pub mod stores;
pub mod strategies;
mod utils;
mod warmer;

// Re-export public API
pub use builder::{CacheStrategies, CacheStrategiesBuilder};
pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use error::{BoxError, CacheError};
pub use expander::{
    ACTIVE_USER_LIMIT, CandidateSource, KeyPatternExpander, POPULAR_PRODUCT_LIMIT,
    PRODUCT_ID_PLACEHOLDER, PlaceholderExpander, StaticCandidates, USER_ID_PLACEHOLDER,
};
pub use metrics::{CacheMetrics, CacheStats, MetricsCollector, derive_metrics};
pub use service::{ApiCacheService, SetOptions, WarmupEntry};
pub use store::KvStore;
pub use stores::memory::{MemoryKvStore, MemoryKvStoreConfig};
pub use stores::metrics::{CommandMetric, InstrumentedStore, LatencyRecorder, MetricsSink};
pub use stores::redis::{RedisKvStore, RedisKvStoreConfig};
pub use strategies::{BatchPersist, CacheAside, CacheAsideOptions, WriteBehind, WriteThrough};
pub use utils::{build_cache_key, glob_match};
pub use warmer::{CacheWarmer, WarmSummary, WarmingPattern};
