use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{BoxError, CacheError};
use crate::service::{ApiCacheService, SetOptions};

/// Persist first, then cache.
///
/// The cache never holds a value that was not durably persisted: if the
/// persist call fails the cache is left untouched.
#[derive(Clone)]
pub struct WriteThrough {
    cache: Arc<ApiCacheService>,
}

impl WriteThrough {
    pub fn new(cache: Arc<ApiCacheService>) -> Self {
        WriteThrough { cache }
    }

    /// Persist `data`, then cache it under `key` for `ttl` (default TTL when `None`).
    ///
    /// # Example
    /// ```ignore
    /// write_through.execute("api_cache:/cart/42", cart, |cart| async move {
    ///     db.save_cart(&cart).await
    /// }, None).await?;
    /// ```
    pub async fn execute<V, F, Fut, E>(
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
        self.cache
            .call_origin("persist", key, persist(data.clone()))
            .await?;

        self.cache
            .set(key, &data, SetOptions {
                ttl,
                tags: Vec::new(),
            })
            .await;

        Ok(())
    }
}
