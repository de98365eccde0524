//! Cache configuration and record types.

use crate::config::CacheDefaults;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for cache behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    /// TTL used when a caller does not pass one.
    pub default_ttl: Duration,
    /// Store usage ratio above which a `set` triggers eviction.
    pub eviction_threshold: f64,
    /// Fraction of cache entries removed per eviction pass.
    pub eviction_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: CacheDefaults::TTL,
            eviction_threshold: CacheDefaults::EVICTION_THRESHOLD,
            eviction_fraction: CacheDefaults::EVICTION_FRACTION,
        }
    }
}

/// A cached response body with its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Store key; not part of the persisted record.
    #[serde(skip)]
    pub key: String,
    #[serde(with = "crate::store::encoding::hex_bytes")]
    pub value: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether the entry is still servable at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

/// Cache-facing view of store usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheUsage {
    /// Bytes used across the whole store.
    pub used: u64,
    pub quota: u64,
    pub percent: f64,
    /// Number of cache entries.
    pub entries: usize,
}
