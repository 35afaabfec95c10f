use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::CacheError;
use crate::store::KvStore;
use crate::utils::{duration_ms, glob_match, now_ms};

/// Configuration for MemoryKvStore.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStoreConfig {
    /// Evict keys closest to expiry once more than this many keys are held.
    ///
    /// Evictions are reported as `evicted_keys` by `INFO stats`.
    pub max_keys: Option<usize>,
}

#[derive(Clone)]
enum Value {
    String(String),
    Set(HashSet<String>),
}

enum Lookup {
    Hit(String),
    Expired,
    Missing,
}

#[derive(Clone)]
struct Slot {
    value: Value,
    /// Unix milli timestamp, `None` for keys without expiry.
    expires: Option<i64>,
}

impl Slot {
    fn is_live(&self, now: i64) -> bool {
        self.expires.is_none_or(|expires| expires > now)
    }

    fn approx_bytes(&self) -> usize {
        match &self.value {
            Value::String(s) => s.len(),
            Value::Set(members) => members.iter().map(String::len).sum(),
        }
    }
}

/// In-process implementation of the key-value contract.
///
/// Behaves like a single Redis database for the commands the cache uses,
/// including lazy expiry and the `keyspace_hits`/`keyspace_misses`/
/// `evicted_keys` counters reported by `INFO`. Suitable for tests and
/// single-process development setups.
pub struct MemoryKvStore {
    state: RwLock<HashMap<String, Slot>>,
    max_keys: Option<usize>,
    hits: AtomicU64,
    misses: AtomicU64,
    evicted: AtomicU64,
    writes: AtomicU64,
}

/// Expired keys are swept once every this many writes when under capacity.
const SWEEP_EVERY_WRITES: u64 = 1024;

impl MemoryKvStore {
    /// Create a new MemoryKvStore with the given configuration.
    pub fn new(config: MemoryKvStoreConfig) -> Self {
        MemoryKvStore {
            state: RwLock::new(HashMap::new()),
            max_keys: config.max_keys,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = now_ms();
        let state = self.state.read().await;
        state.values().filter(|slot| slot.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn wrong_type(key: &str) -> CacheError {
        CacheError::operation(
            "memory",
            key,
            "WRONGTYPE Operation against a key holding the wrong kind of value",
        )
    }

    /// Drop expired keys, then the soonest-expiring keys above `max_keys`.
    ///
    /// Runs on every write only while the store is over capacity; otherwise
    /// expired keys are swept every `SWEEP_EVERY_WRITES` writes and reads
    /// expire lazily in between.
    fn evict(&self, state: &mut HashMap<String, Slot>) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        let over_capacity = self.max_keys.is_some_and(|max_keys| state.len() > max_keys);
        if !over_capacity && writes % SWEEP_EVERY_WRITES != 0 {
            return;
        }

        let now = now_ms();
        state.retain(|_, slot| slot.is_live(now));

        let Some(max_keys) = self.max_keys else {
            return;
        };
        if state.len() <= max_keys {
            return;
        }

        let mut candidates: Vec<_> = state
            .iter()
            .map(|(k, slot)| (k.clone(), slot.expires.unwrap_or(i64::MAX)))
            .collect();
        candidates.sort_by_key(|(_, expires)| *expires);

        let to_remove = state.len() - max_keys;
        for (key, _) in candidates.into_iter().take(to_remove) {
            state.remove(&key);
        }
        self.evicted.fetch_add(to_remove as u64, Ordering::Relaxed);
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new(MemoryKvStoreConfig::default())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = now_ms();
        let found = {
            let state = self.state.read().await;
            match state.get(key) {
                Some(slot) if slot.is_live(now) => match &slot.value {
                    Value::String(s) => Lookup::Hit(s.clone()),
                    Value::Set(_) => return Err(Self::wrong_type(key)),
                },
                Some(_) => Lookup::Expired,
                None => Lookup::Missing,
            }
        };

        match found {
            Lookup::Hit(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Lookup::Expired => {
                // Entry is expired, remove it
                let mut state = self.state.write().await;
                if state.get(key).is_some_and(|slot| !slot.is_live(now)) {
                    state.remove(key);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Lookup::Missing => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        state.insert(
            key.to_string(),
            Slot {
                value: Value::String(value.to_string()),
                expires: Some(now_ms() + duration_ms(ttl)),
            },
        );
        self.evict(&mut state);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<usize, CacheError> {
        let now = now_ms();
        let mut state = self.state.write().await;
        let removed = keys
            .iter()
            .filter_map(|key| state.remove(key))
            .filter(|slot| slot.is_live(now))
            .count();
        Ok(removed)
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<(), CacheError> {
        let now = now_ms();
        let mut state = self.state.write().await;

        let slot = state
            .entry(set.to_string())
            .and_modify(|slot| {
                if !slot.is_live(now) {
                    *slot = Slot {
                        value: Value::Set(HashSet::new()),
                        expires: None,
                    };
                }
            })
            .or_insert_with(|| Slot {
                value: Value::Set(HashSet::new()),
                expires: None,
            });

        match &mut slot.value {
            Value::Set(members) => {
                members.insert(member.to_string());
            }
            Value::String(_) => return Err(Self::wrong_type(set)),
        }

        self.evict(&mut state);
        Ok(())
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>, CacheError> {
        let now = now_ms();
        let state = self.state.read().await;

        match state.get(set) {
            Some(slot) if slot.is_live(now) => match &slot.value {
                Value::Set(members) => Ok(members.iter().cloned().collect()),
                Value::String(_) => Err(Self::wrong_type(set)),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = now_ms();
        let mut state = self.state.write().await;

        match state.get_mut(key) {
            Some(slot) if slot.is_live(now) => {
                slot.expires = Some(now + duration_ms(ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let now = now_ms();
        let state = self.state.read().await;

        Ok(state
            .get(key)
            .filter(|slot| slot.is_live(now))
            .and_then(|slot| slot.expires)
            .map(|expires| Duration::from_millis((expires - now).max(0) as u64)))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let now = now_ms();
        let state = self.state.read().await;

        Ok(state
            .iter()
            .filter(|(key, slot)| slot.is_live(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn info(&self, section: &str) -> Result<String, CacheError> {
        let now = now_ms();
        let state = self.state.read().await;
        let live: Vec<_> = state.iter().filter(|(_, s)| s.is_live(now)).collect();

        let used_memory: usize = live
            .iter()
            .map(|(key, slot)| key.len() + slot.approx_bytes())
            .sum();
        let with_expiry = live.iter().filter(|(_, s)| s.expires.is_some()).count();

        let stats = format!(
            "# Stats\r\nkeyspace_hits:{}\r\nkeyspace_misses:{}\r\nevicted_keys:{}\r\n",
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.evicted.load(Ordering::Relaxed),
        );
        let memory = format!(
            "# Memory\r\nused_memory:{}\r\nused_memory_human:{}\r\n",
            used_memory,
            human_bytes(used_memory as u64),
        );
        let keyspace = format!(
            "# Keyspace\r\ndb0:keys={},expires={}\r\n",
            live.len(),
            with_expiry
        );

        Ok(match section.to_ascii_lowercase().as_str() {
            "stats" => stats,
            "memory" => memory,
            "keyspace" => keyspace,
            _ => format!("{}\r\n{}\r\n{}", stats, memory, keyspace),
        })
    }
}

/// Format a byte count the way Redis renders `used_memory_human`.
fn human_bytes(bytes: u64) -> String {
    const UNITS: [(&str, f64); 3] = [
        ("G", 1024.0 * 1024.0 * 1024.0),
        ("M", 1024.0 * 1024.0),
        ("K", 1024.0),
    ];

    for (suffix, size) in UNITS {
        if bytes as f64 >= size {
            return format!("{:.2}{}", bytes as f64 / size, suffix);
        }
    }
    format!("{}B", bytes)
}
