//! Filter value caching with exact LRU eviction and TTL.
//!
//! Resolving the value set for a report filter costs an upstream round trip,
//! so resolved sets are cached per query signature. The cache is small and
//! strictly bounded: the entry count never exceeds the configured capacity,
//! not even transiently, and at capacity `put` evicts exactly one
//! least-recently-used entry. That rules out the usual concurrent cache
//! crates, which admit entries first and evict asynchronously; instead the
//! table lives behind a single async mutex, which is cheap at the capacities
//! this cache runs at (tens of entries).
//!
//! Expiry is per entry. Expired entries are purged lazily: a `get` that finds
//! one removes it and reports a miss, and `put` drops expired entries before
//! considering eviction.
//!
//! # Keys
//!
//! A key is the sha256 hex digest of the filter query signature (template id,
//! body, request params, joins); see [`FilterQuerySignature`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

/// Configuration for the filter value cache.
#[derive(Debug, Clone)]
pub struct FilterCacheConfig {
    /// Hard upper bound on the number of entries.
    pub max_entries: usize,
    /// Default TTL for cache entries.
    pub default_ttl: Duration,
}

impl Default for FilterCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 20,
            default_ttl: Duration::from_secs(30),
        }
    }
}

impl FilterCacheConfig {
    /// Sets the maximum number of entries.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Sets the default TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// The parts of a filter query that determine its resolved value set.
///
/// Serialized (with fixed field order) and hashed to form the cache key, so
/// two requests produce the same key exactly when every part matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterQuerySignature<'a> {
    pub template_id: Option<&'a Value>,
    pub body: Option<&'a Value>,
    pub params: Option<&'a Value>,
    pub joins: Option<&'a Value>,
}

impl FilterQuerySignature<'_> {
    /// Returns the sha256 hex digest used as the cache key.
    pub fn key(&self) -> String {
        let mut canonical = serde_json::Map::new();
        if let Some(v) = self.template_id {
            canonical.insert("templateId".to_string(), v.clone());
        }
        if let Some(v) = self.body {
            canonical.insert("body".to_string(), v.clone());
        }
        if let Some(v) = self.params {
            canonical.insert("params".to_string(), v.clone());
        }
        if let Some(v) = self.joins {
            canonical.insert("joins".to_string(), v.clone());
        }
        let mut hasher = Sha256::new();
        hasher.update(Value::Object(canonical).to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

struct CacheEntry {
    values: Vec<Value>,
    expires_at: Instant,
    /// Recency stamp from the owning table's counter; larger means more
    /// recently used.
    last_used: u64,
}

struct CacheTable {
    entries: HashMap<String, CacheEntry>,
    /// Monotonic counter backing the recency stamps.
    clock: u64,
}

impl CacheTable {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
            metrics::counter!("reportd_filter_cache_evictions_total").increment(1);
        }
    }
}

/// Capacity- and TTL-bounded LRU cache for resolved filter value sets.
///
/// Shared across tasks behind `Arc`; all access serializes on one async
/// mutex.
pub struct FilterCache {
    table: Mutex<CacheTable>,
    config: FilterCacheConfig,
}

impl std::fmt::Debug for FilterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FilterCache {
    /// Creates a new cache with the given configuration.
    pub fn new(config: FilterCacheConfig) -> Self {
        Self {
            table: Mutex::new(CacheTable {
                entries: HashMap::with_capacity(config.max_entries),
                clock: 0,
            }),
            config,
        }
    }

    /// Retrieves an unexpired value set and refreshes its recency.
    ///
    /// An expired entry is removed on the spot and counts as a miss.
    ///
    /// # Metrics
    ///
    /// - `reportd_filter_cache_hits_total` on hit
    /// - `reportd_filter_cache_misses_total` on miss
    pub async fn get(&self, key: &str) -> Option<Vec<Value>> {
        let mut table = self.table.lock().await;
        let now = Instant::now();
        let expired = matches!(table.entries.get(key), Some(e) if e.expires_at <= now);
        if expired {
            table.entries.remove(key);
        }
        let stamp = table.tick();
        let result = table.entries.get_mut(key).map(|entry| {
            entry.last_used = stamp;
            entry.values.clone()
        });
        if result.is_some() {
            metrics::counter!("reportd_filter_cache_hits_total").increment(1);
        } else {
            metrics::counter!("reportd_filter_cache_misses_total").increment(1);
        }
        result
    }

    /// Inserts a value set under the given key with the default TTL.
    ///
    /// At capacity, exactly one least-recently-used entry is evicted first;
    /// the entry count never exceeds `max_entries`.
    pub async fn put(&self, key: impl Into<String>, values: Vec<Value>) {
        self.put_with_ttl(key, values, self.config.default_ttl).await
    }

    /// Inserts a value set with an explicit TTL.
    pub async fn put_with_ttl(&self, key: impl Into<String>, values: Vec<Value>, ttl: Duration) {
        if self.config.max_entries == 0 {
            return;
        }
        let key = key.into();
        let mut table = self.table.lock().await;
        let now = Instant::now();
        table.purge_expired(now);
        if !table.entries.contains_key(&key) && table.entries.len() >= self.config.max_entries {
            table.evict_lru();
        }
        let stamp = table.tick();
        table.entries.insert(
            key,
            CacheEntry {
                values,
                expires_at: now + ttl,
                last_used: stamp,
            },
        );
    }

    /// Removes a single entry. No-op for unknown keys.
    pub async fn invalidate(&self, key: &str) {
        self.table.lock().await.entries.remove(key);
    }

    /// Drops every entry.
    pub async fn clear(&self) {
        self.table.lock().await.entries.clear();
    }

    /// Current entry count, expired entries included until purged.
    pub async fn len(&self) -> usize {
        self.table.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Registers descriptions for the cache metrics with the installed recorder.
pub fn register_cache_metrics() {
    metrics::describe_counter!(
        "reportd_filter_cache_hits_total",
        "Total number of filter cache hits"
    );
    metrics::describe_counter!(
        "reportd_filter_cache_misses_total",
        "Total number of filter cache misses"
    );
    metrics::describe_counter!(
        "reportd_filter_cache_evictions_total",
        "Total number of filter cache entries evicted at capacity"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn values(n: i64) -> Vec<Value> {
        vec![json!({"value": n})]
    }

    #[tokio::test]
    async fn test_get_miss_then_hit() {
        let cache = FilterCache::new(FilterCacheConfig::default());
        assert_eq!(cache.get("k1").await, None);

        cache.put("k1", values(1)).await;
        assert_eq!(cache.get("k1").await, Some(values(1)));
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_key() {
        let cache = FilterCache::new(FilterCacheConfig::default());
        cache.put("k1", values(1)).await;
        cache.put("k1", values(2)).await;
        assert_eq!(cache.get("k1").await, Some(values(2)));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let config = FilterCacheConfig::default().with_ttl(Duration::from_millis(50));
        let cache = FilterCache::new(config);
        cache.put("k1", values(1)).await;
        assert!(cache.get("k1").await.is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get("k1").await, None);
        // The expired entry was removed, not just hidden.
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_capacity_evicts_exactly_one_lru_entry() {
        let config = FilterCacheConfig::default().with_max_entries(3);
        let cache = FilterCache::new(config);
        cache.put("a", values(1)).await;
        cache.put("b", values(2)).await;
        cache.put("c", values(3)).await;

        // Touch "a" so "b" becomes the least recently used.
        assert!(cache.get("a").await.is_some());

        cache.put("d", values(4)).await;
        assert_eq!(cache.len().await, 3);
        assert_eq!(cache.get("b").await, None);
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("c").await.is_some());
        assert!(cache.get("d").await.is_some());
    }

    #[tokio::test]
    async fn test_put_prefers_dropping_expired_entries_over_eviction() {
        let config = FilterCacheConfig::default().with_max_entries(2);
        let cache = FilterCache::new(config);
        cache
            .put_with_ttl("stale", values(0), Duration::from_millis(10))
            .await;
        cache.put("live", values(1)).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.put("fresh", values(2)).await;

        // The expired entry made room; the live one survived.
        assert!(cache.get("live").await.is_some());
        assert!(cache.get("fresh").await.is_some());
        assert_eq!(cache.get("stale").await, None);
    }

    #[tokio::test]
    async fn test_capacity_holds_under_concurrent_inserts() {
        let cache = Arc::new(FilterCache::new(
            FilterCacheConfig::default().with_max_entries(5),
        ));

        let mut handles = Vec::new();
        for i in 0..50 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.put(format!("key-{i}"), values(i)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.len().await, 5);
    }

    #[tokio::test]
    async fn test_zero_capacity_caches_nothing() {
        let cache = FilterCache::new(FilterCacheConfig::default().with_max_entries(0));
        cache.put("k1", values(1)).await;
        assert_eq!(cache.get("k1").await, None);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = FilterCache::new(FilterCacheConfig::default());
        cache.put("k1", values(1)).await;
        cache.put("k2", values(2)).await;

        cache.invalidate("k1").await;
        assert_eq!(cache.get("k1").await, None);
        assert!(cache.get("k2").await.is_some());

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[test]
    fn test_signature_key_is_stable_and_input_sensitive() {
        let template = json!(42);
        let body = json!({"filter": "region"});
        let params = json!({"sourceId": 1161});

        let sig = FilterQuerySignature {
            template_id: Some(&template),
            body: Some(&body),
            params: Some(&params),
            joins: None,
        };
        let same = FilterQuerySignature {
            template_id: Some(&template),
            body: Some(&body),
            params: Some(&params),
            joins: None,
        };
        assert_eq!(sig.key(), same.key());
        assert_eq!(sig.key().len(), 64);

        let other_params = json!({"sourceId": 9999});
        let different = FilterQuerySignature {
            template_id: Some(&template),
            body: Some(&body),
            params: Some(&other_params),
            joins: None,
        };
        assert_ne!(sig.key(), different.key());

        // Absent parts change the key too.
        let missing_body = FilterQuerySignature {
            template_id: Some(&template),
            body: None,
            params: Some(&params),
            joins: None,
        };
        assert_ne!(sig.key(), missing_body.key());
    }
}
