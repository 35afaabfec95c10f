use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Cached payload used across benchmarks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchProduct {
    pub id: u64,
    pub name: String,
    pub category: String,
    pub price_cents: u64,
}

impl BenchProduct {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            name: format!("Product {}", id),
            category: format!("category-{}", id % 12),
            price_cents: 100 + (id % 5000),
        }
    }
}

pub fn product_key(id: usize) -> String {
    format!("api_cache:/api/products/{}", id)
}

/// Simulated primary store with fixed latency on reads and batch writes
#[derive(Clone)]
pub struct FakeDatabase {
    data: Arc<HashMap<String, BenchProduct>>,
    latency_ms: u64,
    query_count: Arc<AtomicUsize>,
    written_rows: Arc<AtomicUsize>,
}

impl FakeDatabase {
    pub fn new(num_products: usize, latency_ms: u64) -> Self {
        let data = (0..num_products)
            .map(|i| (product_key(i), BenchProduct::new(i as u64)))
            .collect();

        Self {
            data: Arc::new(data),
            latency_ms,
            query_count: Arc::new(AtomicUsize::new(0)),
            written_rows: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn get(&self, key: &str) -> Result<BenchProduct, String> {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;

        self.data
            .get(key)
            .cloned()
            .ok_or_else(|| format!("no product at {}", key))
    }

    /// One round trip regardless of batch size.
    pub async fn save_batch(&self, batch: HashMap<String, BenchProduct>) -> Result<(), String> {
        tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        self.written_rows.fetch_add(batch.len(), Ordering::Relaxed);
        Ok(())
    }

    #[allow(dead_code)]
    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::Relaxed)
    }

    #[allow(dead_code)]
    pub fn written_rows(&self) -> usize {
        self.written_rows.load(Ordering::Relaxed)
    }
}

/// Generate request keys for different workload shapes
pub struct KeyGenerator {
    num_keys: usize,
}

impl KeyGenerator {
    pub fn new(num_keys: usize) -> Self {
        Self { num_keys }
    }

    /// Every key once, in order
    pub fn sequential(&self) -> Vec<String> {
        (0..self.num_keys).map(product_key).collect()
    }

    /// `hit_ratio` of requests go to the hottest 20% of keys
    pub fn mixed(&self, hit_ratio: f64) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let hot_key_count = (self.num_keys / 5).max(1);

        (0..1000)
            .map(|_| {
                if rng.gen_bool(hit_ratio) || hot_key_count >= self.num_keys {
                    product_key(rng.gen_range(0..hot_key_count))
                } else {
                    product_key(rng.gen_range(hot_key_count..self.num_keys))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    async fn test_fake_database() {
        use super::{FakeDatabase, product_key};

        let db = FakeDatabase::new(100, 1);

        let product = db.get(&product_key(0)).await;
        assert_eq!(product.unwrap().id, 0);
        assert!(db.get("api_cache:/api/products/100").await.is_err());

        assert_eq!(db.query_count(), 2);
    }

    #[test]
    fn test_key_generator() {
        use super::KeyGenerator;

        let key_gen = KeyGenerator::new(100);

        let seq = key_gen.sequential();
        assert_eq!(seq.len(), 100);
        assert_eq!(seq[0], "api_cache:/api/products/0");

        let mixed = key_gen.mixed(0.8);
        assert_eq!(mixed.len(), 1000);
    }
}
