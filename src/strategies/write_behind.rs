//! Write-behind (write-back) caching.
//!
//! Writes land in the cache immediately and are persisted later in batches.
//! The pending queue lives only in this process: every instance of a
//! horizontally scaled deployment keeps its own queue, so persistence is
//! at-least-once and unordered across instances.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::{BoxError, CacheError};
use crate::service::{ApiCacheService, SetOptions};
use crate::utils::now_ms;

/// Persists one batch of `key -> value` writes to the primary store.
///
/// Implemented for any `Fn(HashMap<String, V>) -> impl Future<Output = Result<(), E>>`.
#[async_trait]
pub trait BatchPersist<V>: Send + Sync {
    async fn persist(&self, batch: HashMap<String, V>) -> Result<(), BoxError>;
}

#[async_trait]
impl<V, F, Fut, E> BatchPersist<V> for F
where
    V: Send + 'static,
    F: Fn(HashMap<String, V>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send,
    E: Into<BoxError>,
{
    async fn persist(&self, batch: HashMap<String, V>) -> Result<(), BoxError> {
        (self)(batch).await.map_err(Into::into)
    }
}

struct PendingWrite<V> {
    data: V,
    enqueued_at: i64,
}

struct FlushTimer {
    id: u64,
    handle: JoinHandle<()>,
}

/// The pending map and its timer, always mutated together under one lock.
struct Queue<V> {
    pending: HashMap<String, PendingWrite<V>>,
    timer: Option<FlushTimer>,
    next_timer_id: u64,
    /// The persist function supplied by the most recent write or flush.
    persist: Option<Arc<dyn BatchPersist<V>>>,
    in_flight: Vec<JoinHandle<()>>,
}

impl<V> Queue<V> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }

    fn take_pending(&mut self) -> Vec<(String, PendingWrite<V>)> {
        self.pending.drain().collect()
    }

    fn track(&mut self, handle: JoinHandle<()>) {
        self.in_flight.retain(|h| !h.is_finished());
        self.in_flight.push(handle);
    }
}

struct Inner<V> {
    cache: Arc<ApiCacheService>,
    flush_interval: Duration,
    max_batch_size: usize,
    queue: Mutex<Queue<V>>,
}

/// A write-behind queue.
///
/// Cloning shares the queue. A pending timer keeps the queue alive, so
/// dropping every handle still lets a scheduled flush run; call
/// [`shutdown`](WriteBehind::shutdown) or [`discard`](WriteBehind::discard)
/// to settle pending work explicitly.
pub struct WriteBehind<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for WriteBehind<V> {
    fn clone(&self) -> Self {
        WriteBehind {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> WriteBehind<V>
where
    V: Serialize + Clone + Send + Sync + 'static,
{
    /// # Arguments
    /// * `cache` - The cache store writes land in
    /// * `flush_interval` - Quiet period after the last write before flushing
    /// * `max_batch_size` - Queue size that triggers an immediate flush
    pub fn new(cache: Arc<ApiCacheService>, flush_interval: Duration, max_batch_size: usize) -> Self {
        WriteBehind {
            inner: Arc::new(Inner {
                cache,
                flush_interval,
                max_batch_size: max_batch_size.max(1),
                queue: Mutex::new(Queue {
                    pending: HashMap::new(),
                    timer: None,
                    next_timer_id: 0,
                    persist: None,
                    in_flight: Vec::new(),
                }),
            }),
        }
    }

    /// Cache `data` under `key` now and queue it for persistence.
    ///
    /// A later write to the same key before the flush replaces this one.
    /// Reaching `max_batch_size` drains the queue and persists it in the
    /// background; otherwise the flush timer is restarted so a burst of
    /// writes coalesces into one flush. Persist failures never reach this
    /// caller.
    pub async fn write<P>(&self, key: &str, data: V, persist: P)
    where
        P: BatchPersist<V> + 'static,
    {
        self.inner.cache.set(key, &data, SetOptions::default()).await;

        let persist: Arc<dyn BatchPersist<V>> = Arc::new(persist);
        let mut queue = self.inner.queue.lock().await;
        queue.persist = Some(Arc::clone(&persist));
        queue.pending.insert(
            key.to_string(),
            PendingWrite {
                data,
                enqueued_at: now_ms(),
            },
        );

        if queue.pending.len() >= self.inner.max_batch_size {
            queue.cancel_timer();
            let batch = queue.take_pending();
            tracing::debug!("Write-behind batch full, flushing {} entries", batch.len());
            let inner = Arc::clone(&self.inner);
            let handle = tokio::spawn(async move {
                let _ = inner.persist_batch(batch, persist).await;
            });
            queue.track(handle);
        } else {
            self.inner.schedule_flush(&mut queue);
        }
    }

    /// Cancel the timer and persist everything pending with `persist`.
    ///
    /// Returns the number of entries persisted. On failure every entry of
    /// the batch goes back into the queue, unless a newer write for the same
    /// key arrived meanwhile, and the error is returned.
    pub async fn flush<P>(&self, persist: P) -> Result<usize, CacheError>
    where
        P: BatchPersist<V> + 'static,
    {
        let persist: Arc<dyn BatchPersist<V>> = Arc::new(persist);
        let batch = {
            let mut queue = self.inner.queue.lock().await;
            queue.persist = Some(Arc::clone(&persist));
            queue.cancel_timer();
            queue.take_pending()
        };

        self.inner.persist_batch(batch, persist).await
    }

    /// Number of writes waiting to be persisted.
    pub async fn pending_len(&self) -> usize {
        self.inner.queue.lock().await.pending.len()
    }

    /// Stop the timer, wait for in-flight flushes and persist what is left
    /// with the most recently supplied persist function.
    pub async fn shutdown(&self) -> Result<usize, CacheError> {
        let (batch, persist, in_flight) = {
            let mut queue = self.inner.queue.lock().await;
            queue.cancel_timer();
            (
                queue.take_pending(),
                queue.persist.clone(),
                std::mem::take(&mut queue.in_flight),
            )
        };

        for handle in in_flight {
            if let Err(e) = handle.await {
                tracing::warn!("Write-behind flush task failed: error={}", e);
            }
        }

        // Failed in-flight batches were re-queued while we waited.
        let mut batch = batch;
        batch.extend(self.inner.queue.lock().await.take_pending());

        let Some(persist) = persist else {
            return Ok(0);
        };
        let flushed = self.inner.persist_batch(batch, persist).await?;
        tracing::info!("Write-behind queue shut down after flushing {} entries", flushed);
        Ok(flushed)
    }

    /// Stop the timer and drop every pending write. Returns how many were dropped.
    pub async fn discard(&self) -> usize {
        let mut queue = self.inner.queue.lock().await;
        queue.cancel_timer();
        let dropped = queue.pending.len();
        queue.pending.clear();
        if dropped > 0 {
            tracing::warn!("Discarded {} unpersisted write-behind entries", dropped);
        }
        dropped
    }
}

impl<V> Inner<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Replace any scheduled flush with one `flush_interval` from now.
    fn schedule_flush(self: &Arc<Self>, queue: &mut Queue<V>) {
        queue.cancel_timer();

        let id = queue.next_timer_id;
        queue.next_timer_id += 1;

        let inner = Arc::clone(self);
        let interval = self.flush_interval;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            inner.fire_timer(id).await;
        });

        queue.timer = Some(FlushTimer { id, handle });
    }

    async fn fire_timer(self: &Arc<Self>, id: u64) {
        let mut queue = self.queue.lock().await;
        if queue.timer.as_ref().is_none_or(|timer| timer.id != id) {
            return;
        }
        // Detach rather than abort: this task is the timer.
        queue.timer = None;

        let Some(persist) = queue.persist.clone() else {
            tracing::warn!(
                "Write-behind timer fired without a persist function, keeping {} entries",
                queue.pending.len()
            );
            return;
        };
        if queue.pending.is_empty() {
            return;
        }
        let batch = queue.take_pending();

        tracing::debug!("Write-behind timer fired, flushing {} entries", batch.len());
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _ = inner.persist_batch(batch, persist).await;
        });
        queue.track(handle);
    }

    async fn persist_batch(
        self: &Arc<Self>,
        batch: Vec<(String, PendingWrite<V>)>,
        persist: Arc<dyn BatchPersist<V>>,
    ) -> Result<usize, CacheError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let size = batch.len();
        let values: HashMap<String, V> = batch
            .iter()
            .map(|(key, write)| (key.clone(), write.data.clone()))
            .collect();

        match self
            .cache
            .call_origin("write-behind persist", "write-behind", persist.persist(values))
            .await
        {
            Ok(()) => {
                tracing::debug!("Write-behind flushed {} entries", size);
                Ok(size)
            }
            Err(e) => {
                let oldest = batch.iter().map(|(_, w)| w.enqueued_at).min().unwrap_or_default();
                tracing::error!(
                    "Write-behind flush failed, re-queueing {} entries (oldest enqueued at {}): error={}",
                    size,
                    oldest,
                    e
                );
                self.requeue(batch).await;
                Err(e)
            }
        }
    }

    async fn requeue(&self, batch: Vec<(String, PendingWrite<V>)>) {
        let mut queue = self.queue.lock().await;
        for (key, write) in batch {
            // A newer write for the key wins over the failed one.
            queue.pending.entry(key).or_insert(write);
        }
    }
}
