use async_trait::async_trait;
use std::time::Duration;

use crate::error::CacheError;

/// The subset of a Redis-compatible key-value store the cache layer relies on.
///
/// Every strategy talks to the backing store only through this trait, so the
/// remote server can be swapped for the in-process [`MemoryKvStore`] in tests.
///
/// [`MemoryKvStore`]: crate::stores::memory::MemoryKvStore
#[async_trait]
pub trait KvStore: Send + Sync {
    /// A name for logs and errors.
    ///
    /// # Example
    /// - "memory"
    /// - "redis"
    fn name(&self) -> &'static str;

    /// `GET key`. The response must be `None` for missing keys.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// `SETEX key ttl value`.
    ///
    /// Stores with whole-second expiry round `ttl` up to at least one second.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// `DEL key...`, returning how many keys existed.
    async fn del(&self, keys: &[String]) -> Result<usize, CacheError>;

    /// `SADD set member`.
    async fn sadd(&self, set: &str, member: &str) -> Result<(), CacheError>;

    /// `SMEMBERS set`. Missing sets are empty.
    async fn smembers(&self, set: &str) -> Result<Vec<String>, CacheError>;

    /// `EXPIRE key ttl`. Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Remaining time to live of `key`.
    ///
    /// `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// `KEYS pattern` with Redis glob semantics.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// `INFO section`, returned as the raw `field:value` text blob.
    async fn info(&self, section: &str) -> Result<String, CacheError>;
}
