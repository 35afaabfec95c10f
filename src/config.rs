use std::env;
use std::time::Duration;

/// Tunables shared by the cache store, the strategies and the warmer.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prefix for every key built by `generate_cache_key` and matched by
    /// `invalidate_pattern`.
    pub key_prefix: String,

    /// Prefix for tag index sets.
    pub tag_prefix: String,

    /// TTL applied by `set` when none is given.
    ///
    /// Default: 300s
    pub default_ttl: Duration,

    /// Serve stale entries while refreshing them in the background.
    ///
    /// Default: `true`
    pub stale_while_revalidate: bool,

    /// Maximum staleness tolerated by cache-aside reads. Entries written by
    /// cache-aside live this long in the store.
    ///
    /// Default: 3600s
    pub stale_ttl: Duration,

    /// Quiet period after the last write-behind write before the queue is flushed.
    ///
    /// Default: 5000ms
    pub flush_interval: Duration,

    /// Queue size that triggers an immediate write-behind flush.
    ///
    /// Default: 100
    pub max_batch_size: usize,

    /// Maximum fetches in flight per warm-up batch.
    ///
    /// Default: 10
    pub concurrency_limit: usize,

    /// Upper bound on any single store command.
    pub kv_timeout: Duration,

    /// Upper bound on any caller-supplied fetch or persist call.
    pub origin_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            key_prefix: "api_cache:".to_string(),
            tag_prefix: "tag:".to_string(),
            default_ttl: Duration::from_secs(300),
            stale_while_revalidate: true,
            stale_ttl: Duration::from_secs(3600),
            flush_interval: Duration::from_millis(5000),
            max_batch_size: 100,
            concurrency_limit: 10,
            kv_timeout: Duration::from_secs(2),
            origin_timeout: Duration::from_secs(30),
        }
    }
}

impl CacheConfig {
    /// Defaults overridden by `CACHE_*` environment variables.
    ///
    /// Unset or unparsable variables keep their default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());
        let mut config = Self::default();

        if let Some(prefix) = lookup("CACHE_KEY_PREFIX") {
            config.key_prefix = prefix;
        }
        if let Some(secs) = parse("CACHE_DEFAULT_TTL_SECS") {
            config.default_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse("CACHE_STALE_TTL_SECS") {
            config.stale_ttl = Duration::from_secs(secs);
        }
        if let Some(swr) = lookup("CACHE_STALE_WHILE_REVALIDATE").and_then(|v| parse_bool(&v)) {
            config.stale_while_revalidate = swr;
        }
        if let Some(ms) = parse("CACHE_FLUSH_INTERVAL_MS") {
            config.flush_interval = Duration::from_millis(ms);
        }
        if let Some(size) = parse("CACHE_MAX_BATCH_SIZE") {
            config.max_batch_size = (size as usize).max(1);
        }
        if let Some(limit) = parse("CACHE_WARM_CONCURRENCY") {
            config.concurrency_limit = (limit as usize).max(1);
        }
        if let Some(ms) = parse("CACHE_KV_TIMEOUT_MS") {
            config.kv_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse("CACHE_ORIGIN_TIMEOUT_MS") {
            config.origin_timeout = Duration::from_millis(ms);
        }

        config
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
