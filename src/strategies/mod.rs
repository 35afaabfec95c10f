//! Caching strategies built on [`ApiCacheService`](crate::service::ApiCacheService).

pub mod cache_aside;
pub mod write_behind;
pub mod write_through;

pub use cache_aside::{CacheAside, CacheAsideOptions};
pub use write_behind::{BatchPersist, WriteBehind};
pub use write_through::WriteThrough;
