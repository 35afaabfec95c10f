//! Latency instrumentation for key-value stores.
//!
//! `InstrumentedStore` wraps any [`KvStore`] and emits one [`CommandMetric`]
//! per command to a [`MetricsSink`]. [`LatencyRecorder`] is the sink the
//! metrics collector reads its average response time from.
//!
//! # Example
//!
//! ```ignore
//! let recorder = Arc::new(LatencyRecorder::new());
//! let redis = Arc::new(RedisKvStore::new(config).await?);
//! let store: Arc<dyn KvStore> = Arc::new(InstrumentedStore::new(redis, recorder.clone()));
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::CacheError;
use crate::store::KvStore;

/// Emitted once for every store command.
#[derive(Debug, Clone)]
pub struct CommandMetric {
    /// The command name, e.g. "GET" or "SADD".
    pub command: &'static str,
    /// The key, set or pattern the command addressed.
    pub key: String,
    /// Whether the command returned successfully.
    pub ok: bool,
    /// Latency of the command in milliseconds.
    pub latency_ms: f64,
    /// Name of the wrapped store (from KvStore::name()).
    pub tier: &'static str,
}

/// Trait for receiving store command metrics.
///
/// Called synchronously in the hot path; implementations should be fast.
pub trait MetricsSink: Send + Sync {
    fn emit(&self, metric: CommandMetric);
}

/// Aggregates command latencies into a running average.
#[derive(Debug, Default)]
pub struct LatencyRecorder {
    samples: AtomicU64,
    failures: AtomicU64,
    total_micros: AtomicU64,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands observed.
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Number of commands that returned an error.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Mean command latency in milliseconds, 0.0 before any sample.
    pub fn average_ms(&self) -> f64 {
        let samples = self.samples();
        if samples == 0 {
            return 0.0;
        }
        self.total_micros.load(Ordering::Relaxed) as f64 / samples as f64 / 1000.0
    }

    pub fn record(&self, latency: Duration, ok: bool) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl MetricsSink for LatencyRecorder {
    fn emit(&self, metric: CommandMetric) {
        self.record(Duration::from_secs_f64(metric.latency_ms / 1000.0), metric.ok);
    }
}

/// A store wrapper that emits a metric for every command.
pub struct InstrumentedStore {
    inner: Arc<dyn KvStore>,
    sink: Arc<dyn MetricsSink>,
}

impl InstrumentedStore {
    /// Create a new InstrumentedStore wrapping the given store.
    ///
    /// # Arguments
    /// * `inner` - The store to wrap
    /// * `sink` - The metrics sink to emit metrics to
    pub fn new(inner: Arc<dyn KvStore>, sink: Arc<dyn MetricsSink>) -> Self {
        InstrumentedStore { inner, sink }
    }

    /// Get a reference to the metrics sink.
    pub fn sink(&self) -> &Arc<dyn MetricsSink> {
        &self.sink
    }

    fn observe<T>(
        &self,
        command: &'static str,
        key: &str,
        start: Instant,
        result: &Result<T, CacheError>,
    ) {
        self.sink.emit(CommandMetric {
            command,
            key: key.to_string(),
            ok: result.is_ok(),
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            tier: self.inner.name(),
        });
    }
}

#[async_trait]
impl KvStore for InstrumentedStore {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let start = Instant::now();
        let result = self.inner.get(key).await;
        self.observe("GET", key, start, &result);
        result
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let start = Instant::now();
        let result = self.inner.set_ex(key, value, ttl).await;
        self.observe("SETEX", key, start, &result);
        result
    }

    async fn del(&self, keys: &[String]) -> Result<usize, CacheError> {
        let start = Instant::now();
        let result = self.inner.del(keys).await;
        let first = keys.first().map(String::as_str).unwrap_or_default();
        self.observe("DEL", first, start, &result);
        result
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<(), CacheError> {
        let start = Instant::now();
        let result = self.inner.sadd(set, member).await;
        self.observe("SADD", set, start, &result);
        result
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>, CacheError> {
        let start = Instant::now();
        let result = self.inner.smembers(set).await;
        self.observe("SMEMBERS", set, start, &result);
        result
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let start = Instant::now();
        let result = self.inner.expire(key, ttl).await;
        self.observe("EXPIRE", key, start, &result);
        result
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let start = Instant::now();
        let result = self.inner.ttl(key).await;
        self.observe("PTTL", key, start, &result);
        result
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let start = Instant::now();
        let result = self.inner.keys(pattern).await;
        self.observe("KEYS", pattern, start, &result);
        result
    }

    // INFO is introspection, not cache traffic; it is not recorded.
    async fn info(&self, section: &str) -> Result<String, CacheError> {
        self.inner.info(section).await
    }
}
