//! Key-value store implementations for the cache library.

pub mod memory;
pub mod metrics;
pub mod redis;

pub use memory::{MemoryKvStore, MemoryKvStoreConfig};
pub use metrics::{InstrumentedStore, LatencyRecorder};
pub use redis::{RedisKvStore, RedisKvStoreConfig};
