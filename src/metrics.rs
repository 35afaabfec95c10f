//! Point-in-time cache metrics derived from the store's INFO counters.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::service::ApiCacheService;
use crate::stores::metrics::LatencyRecorder;
use crate::utils::parse_info;

/// Store-wide cache metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    /// Percentage of lookups that hit, 0 before the first lookup.
    pub hit_rate: f64,
    /// Percentage of lookups that missed, 0 before the first lookup.
    pub miss_rate: f64,
    /// Mean store command latency in milliseconds, 0 when not instrumented.
    pub avg_response_time: f64,
    /// Bytes used by the store (`used_memory`).
    pub cache_size: u64,
    /// Cumulative keys evicted by the store (`evicted_keys`).
    pub eviction_rate: u64,
}

/// Key count and memory footprint of the cache namespace.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_keys: usize,
    pub memory_usage: String,
}

impl CacheStats {
    pub const UNKNOWN: &'static str = "Unknown";
}

impl Default for CacheStats {
    fn default() -> Self {
        CacheStats {
            total_keys: 0,
            memory_usage: Self::UNKNOWN.to_string(),
        }
    }
}

/// Reads store introspection output and derives [`CacheMetrics`].
pub struct MetricsCollector {
    cache: Arc<ApiCacheService>,
    latency: Option<Arc<LatencyRecorder>>,
}

impl MetricsCollector {
    pub fn new(cache: Arc<ApiCacheService>) -> Self {
        MetricsCollector {
            cache,
            latency: None,
        }
    }

    /// Report `avg_response_time` from `recorder`, typically the sink of an
    /// [`InstrumentedStore`](crate::stores::InstrumentedStore).
    pub fn with_latency(mut self, recorder: Arc<LatencyRecorder>) -> Self {
        self.latency = Some(recorder);
        self
    }

    /// Snapshot the store-wide counters.
    ///
    /// A section that cannot be read contributes zeros; this never fails.
    pub async fn get_metrics(&self) -> CacheMetrics {
        let stats = self.read_section("stats").await;
        let memory = self.read_section("memory").await;

        let mut metrics = derive_metrics(&stats, &memory);
        metrics.avg_response_time = self
            .latency
            .as_ref()
            .map(|recorder| recorder.average_ms())
            .unwrap_or_default();
        metrics
    }

    async fn read_section(&self, section: &str) -> HashMap<String, String> {
        let store = self.cache.store();
        match self.cache.kv("INFO", section, store.info(section)).await {
            Ok(info) => parse_info(&info),
            Err(e) => {
                tracing::warn!("Failed to read store INFO: section={}, error={}", section, e);
                HashMap::new()
            }
        }
    }
}

fn counter(fields: &HashMap<String, String>, name: &str) -> u64 {
    fields
        .get(name)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Derive rates from parsed `INFO stats` and `INFO memory` fields.
pub fn derive_metrics(
    stats: &HashMap<String, String>,
    memory: &HashMap<String, String>,
) -> CacheMetrics {
    let hits = counter(stats, "keyspace_hits");
    let misses = counter(stats, "keyspace_misses");
    let total = hits + misses;

    let (hit_rate, miss_rate) = if total > 0 {
        (
            hits as f64 / total as f64 * 100.0,
            misses as f64 / total as f64 * 100.0,
        )
    } else {
        (0.0, 0.0)
    };

    CacheMetrics {
        hit_rate,
        miss_rate,
        avg_response_time: 0.0,
        cache_size: counter(memory, "used_memory"),
        eviction_rate: counter(stats, "evicted_keys"),
    }
}
