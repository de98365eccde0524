//! TTL cache over the persistent store.

use super::types::{CacheConfig, CacheEntry, CacheUsage};
use crate::clock::DynClock;
use crate::error::{Result, TetherError};
use crate::store::{DynStore, CACHE_NAMESPACE};
use std::time::Duration;
use tracing::{debug, warn};

/// Persistent cache of GET response bodies.
///
/// Expired entries are never returned; they are deleted lazily when read or
/// in bulk by [`cleanup_expired`](Self::cleanup_expired). When the store
/// nears its quota the oldest entries are evicted first.
pub struct ResponseCache {
    store: DynStore,
    clock: DynClock,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(store: DynStore, clock: DynClock, config: CacheConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Fresh value for `key`, if any.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get_entry(key)?.map(|entry| entry.value))
    }

    /// Fresh entry for `key`, if any.
    pub fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        let Some(raw) = self.store.get(CACHE_NAMESPACE, key)? else {
            return Ok(None);
        };

        let entry = match Self::decode(key, &raw) {
            Some(entry) => entry,
            None => {
                self.store.delete(CACHE_NAMESPACE, key)?;
                return Ok(None);
            }
        };

        if !entry.is_fresh(self.clock.now()) {
            debug!("Cache entry {} expired, removing", key);
            self.store.delete(CACHE_NAMESPACE, key)?;
            return Ok(None);
        }

        Ok(Some(entry))
    }

    /// Store a value. `ttl` defaults to the configured TTL.
    ///
    /// If the store is over quota the oldest entries are evicted once and
    /// the write retried; a second rejection is returned to the caller.
    pub fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let now = self.clock.now();
        let entry = CacheEntry {
            key: key.to_string(),
            value: value.to_vec(),
            created_at: now,
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365)),
        };
        let encoded = serde_json::to_vec(&entry)?;

        match self.store.put(CACHE_NAMESPACE, key, &encoded) {
            Ok(()) => {}
            Err(TetherError::QuotaExceeded { .. }) => {
                debug!("Store full while caching {}, evicting oldest entries", key);
                self.evict(Some(key))?;
                self.store.put(CACHE_NAMESPACE, key, &encoded)?;
            }
            Err(e) => return Err(e),
        }

        let usage = self.store.usage()?;
        if usage.ratio() > self.config.eviction_threshold {
            debug!(
                "Storage at {:.1}% after caching {}, evicting",
                usage.percent(),
                key
            );
            self.evict(Some(key))?;
        }

        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        self.store.delete(CACHE_NAMESPACE, key)
    }

    /// Remove every cache entry. Returns the number removed.
    pub fn clear(&self) -> Result<usize> {
        self.store.clear_namespace(CACHE_NAMESPACE)
    }

    /// Remove the oldest `ceil(fraction * n)` entries (at least one).
    ///
    /// Returns the number removed.
    pub fn evict_oldest(&self) -> Result<usize> {
        self.evict(None)
    }

    /// Delete all expired entries. Returns the number removed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut removed = 0;

        for (key, raw) in self.store.list_all(CACHE_NAMESPACE)? {
            let stale = match Self::decode(&key, &raw) {
                Some(entry) => !entry.is_fresh(now),
                None => true,
            };
            if stale && self.store.delete(CACHE_NAMESPACE, &key)? {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Cleaned up {} expired cache entries", removed);
        }
        Ok(removed)
    }

    pub fn usage(&self) -> Result<CacheUsage> {
        let usage = self.store.usage()?;
        let entries = self.store.list_all(CACHE_NAMESPACE)?.len();
        Ok(CacheUsage {
            used: usage.used,
            quota: usage.quota,
            percent: usage.percent(),
            entries,
        })
    }

    fn evict(&self, keep: Option<&str>) -> Result<usize> {
        let mut entries: Vec<(String, Option<chrono::DateTime<chrono::Utc>>)> = self
            .store
            .list_all(CACHE_NAMESPACE)?
            .into_iter()
            .filter(|(key, _)| Some(key.as_str()) != keep)
            .map(|(key, raw)| {
                let created_at = Self::decode(&key, &raw).map(|e| e.created_at);
                (key, created_at)
            })
            .collect();

        if entries.is_empty() {
            return Ok(0);
        }

        // Undecodable records sort first (None < Some)
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let target = ((entries.len() as f64) * self.config.eviction_fraction).ceil() as usize;
        let target = target.clamp(1, entries.len());

        let mut removed = 0;
        for (key, _) in entries.into_iter().take(target) {
            if self.store.delete(CACHE_NAMESPACE, &key)? {
                removed += 1;
            }
        }

        debug!("Evicted {} oldest cache entries", removed);
        Ok(removed)
    }

    fn decode(key: &str, raw: &[u8]) -> Option<CacheEntry> {
        match serde_json::from_slice::<CacheEntry>(raw) {
            Ok(mut entry) => {
                entry.key = key.to_string();
                Some(entry)
            }
            Err(e) => {
                warn!("Discarding unreadable cache entry {}: {}", key, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, PersistentStore};
    use std::sync::Arc;

    fn cache_with(quota: u64) -> (ManualClock, Arc<MemoryStore>, ResponseCache) {
        let clock = ManualClock::new();
        let store = Arc::new(MemoryStore::with_quota(quota));
        let cache = ResponseCache::new(
            store.clone(),
            Arc::new(clock.clone()),
            CacheConfig::default(),
        );
        (clock, store, cache)
    }

    #[test]
    fn test_set_and_get() {
        let (_clock, _store, cache) = cache_with(1 << 20);
        cache.set("k", b"{\"v\":1}", None).unwrap();

        assert_eq!(cache.get("k").unwrap().unwrap(), b"{\"v\":1}");
        assert!(cache.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_expired_entry_never_returned_and_deleted() {
        let (clock, store, cache) = cache_with(1 << 20);
        cache
            .set("k", b"body", Some(Duration::from_secs(60)))
            .unwrap();

        clock.advance(Duration::from_secs(60));
        assert!(cache.get("k").unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get("k").unwrap().is_none());
        assert!(store.get(CACHE_NAMESPACE, "k").unwrap().is_none());
    }

    #[test]
    fn test_evict_oldest_removes_ten_percent() {
        let (clock, _store, cache) = cache_with(1 << 20);
        for i in 0..20 {
            cache.set(&format!("k{:02}", i), b"x", None).unwrap();
            clock.advance(Duration::from_secs(1));
        }

        assert_eq!(cache.evict_oldest().unwrap(), 2);
        assert!(cache.get("k00").unwrap().is_none());
        assert!(cache.get("k01").unwrap().is_none());
        assert!(cache.get("k02").unwrap().is_some());
        assert_eq!(cache.usage().unwrap().entries, 18);
    }

    #[test]
    fn test_evict_oldest_removes_at_least_one() {
        let (_clock, _store, cache) = cache_with(1 << 20);
        cache.set("only", b"x", None).unwrap();
        assert_eq!(cache.evict_oldest().unwrap(), 1);
        assert_eq!(cache.evict_oldest().unwrap(), 0);
    }

    #[test]
    fn test_quota_rejection_evicts_and_retries() {
        // Each record is roughly 200 bytes; two do not fit
        let (clock, _store, cache) = cache_with(300);
        let payload = [b'a'; 50];

        cache.set("old", &payload, None).unwrap();
        clock.advance(Duration::from_secs(1));
        cache.set("new", &payload, None).unwrap();

        assert!(cache.get("old").unwrap().is_none());
        assert!(cache.get("new").unwrap().is_some());
    }

    #[test]
    fn test_oversized_value_surfaces_quota_error() {
        let (_clock, _store, cache) = cache_with(64);
        let err = cache.set("big", &[0u8; 128], None).unwrap_err();
        assert!(matches!(err, TetherError::QuotaExceeded { .. }));
    }

    #[test]
    fn test_high_usage_triggers_eviction_after_set() {
        let (clock, _store, cache) = cache_with(2_000);
        for i in 0..40 {
            cache.set(&format!("k{:03}", i), &[b'z'; 40], None).unwrap();
            clock.advance(Duration::from_secs(1));
        }

        let usage = cache.usage().unwrap();
        assert!(usage.percent <= 90.0, "usage {} should stay under threshold", usage.percent);
        assert!(cache.get("k039").unwrap().is_some());
        assert!(cache.get("k000").unwrap().is_none());
    }

    #[test]
    fn test_cleanup_expired() {
        let (clock, _store, cache) = cache_with(1 << 20);
        cache.set("short", b"1", Some(Duration::from_secs(10))).unwrap();
        cache.set("long", b"2", Some(Duration::from_secs(1000))).unwrap();

        clock.advance(Duration::from_secs(11));
        assert_eq!(cache.cleanup_expired().unwrap(), 1);
        assert_eq!(cache.usage().unwrap().entries, 1);
    }

    #[test]
    fn test_corrupt_entry_treated_as_miss() {
        let (_clock, store, cache) = cache_with(1 << 20);
        store.put(CACHE_NAMESPACE, "bad", b"not json").unwrap();

        assert!(cache.get("bad").unwrap().is_none());
        assert!(store.get(CACHE_NAMESPACE, "bad").unwrap().is_none());
    }

    #[test]
    fn test_clear_leaves_queue_namespace() {
        let (_clock, store, cache) = cache_with(1 << 20);
        cache.set("a", b"1", None).unwrap();
        store.put(crate::store::QUEUE_NAMESPACE, "m1", b"{}").unwrap();

        assert_eq!(cache.clear().unwrap(), 1);
        assert!(store.get(crate::store::QUEUE_NAMESPACE, "m1").unwrap().is_some());
    }
}
