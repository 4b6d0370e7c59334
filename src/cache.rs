//! Cache capability (§6): `get/set/delete/ttl` with hit/miss counters, a
//! single trait with a local tier so callers can later add a distributed
//! tier without changing call sites.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value, ttl_seconds: u64);
    async fn delete(&self, key: &str);
    async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }
    /// Remaining TTL in seconds, or `-1` if the key is absent or has no TTL.
    async fn ttl(&self, key: &str) -> i64;

    fn hits(&self) -> u64;
    fn misses(&self) -> u64;
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// Local in-process cache tier. Striped by `DashMap`'s internal sharding;
/// eviction is lazy (checked on read) plus an explicit LRU-by-expiry sweep.
#[derive(Debug)]
pub struct LocalCache {
    entries: DashMap<String, Entry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry").field("expires_at", &self.expires_at).finish()
    }
}

impl LocalCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Evicts every expired entry. Intended to be called from a background
    /// sweep task; also invoked opportunistically from `get`.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
    }
}

#[async_trait]
impl Cache for LocalCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let hit = self.entries.get(key).and_then(|entry| {
            if entry.expires_at > now { Some(entry.value.clone()) } else { None }
        });
        match hit {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Value, ttl_seconds: u64) {
        self.entries.insert(
            key.to_string(),
            Entry { value, expires_at: Instant::now() + Duration::from_secs(ttl_seconds) },
        );
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn ttl(&self, key: &str) -> i64 {
        match self.entries.get(key) {
            Some(entry) => {
                let remaining = entry.expires_at.saturating_duration_since(Instant::now());
                remaining.as_secs() as i64
            }
            None => -1,
        }
    }

    fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_within_ttl_returns_value() {
        let cache = LocalCache::new();
        cache.set("k", Value::String("v".into()), 60).await;
        assert_eq!(cache.get("k").await, Some(Value::String("v".into())));
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test]
    async fn missing_key_counts_as_miss_and_has_ttl_minus_one() {
        let cache = LocalCache::new();
        assert_eq!(cache.get("absent").await, None);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.ttl("absent").await, -1);
    }

    #[tokio::test]
    async fn delete_removes_the_entry() {
        let cache = LocalCache::new();
        cache.set("k", Value::Bool(true), 60).await;
        cache.delete("k").await;
        assert!(!cache.exists("k").await);
    }
}
