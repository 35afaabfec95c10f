use serde::{Deserialize, Serialize};

/// The envelope stored under every cache key.
///
/// `expires_at` is tracked independently of the store's own TTL so staleness
/// can still be judged after the value has been read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<V> {
    /// The cached value.
    pub value: V,

    /// Unix timestamp in milliseconds after which the entry must be treated as absent.
    pub expires_at: i64,

    /// Invalidation tags attached when the entry was written.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Unix timestamp in milliseconds of the write.
    pub cached_at: i64,
}

impl<V> CacheEntry<V> {
    /// Create a new entry written at `now_ms` that lives for `ttl_ms`.
    pub fn new(value: V, now_ms: i64, ttl_ms: i64, tags: Vec<String>) -> Self {
        CacheEntry {
            value,
            expires_at: now_ms + ttl_ms,
            tags,
            cached_at: now_ms,
        }
    }

    /// Check if the entry has expired and should not be used.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }

    /// The lifetime the entry was written with, in milliseconds.
    pub fn max_age_ms(&self) -> i64 {
        (self.expires_at - self.cached_at).max(0)
    }

    /// Milliseconds elapsed since the write, judged by the local clock.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.cached_at).max(0)
    }
}
