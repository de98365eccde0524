//! Persistent store trait and shared types.

use crate::config::StoreDefaults;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Configuration for a persistent store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum bytes of stored values across all namespaces.
    pub quota_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            quota_bytes: StoreDefaults::QUOTA_BYTES,
        }
    }
}

/// Storage usage estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub used: u64,
    pub quota: u64,
}

impl StorageUsage {
    /// Fraction of quota in use, in `0.0..=1.0` (can exceed 1.0 if quota shrank).
    pub fn ratio(&self) -> f64 {
        if self.quota == 0 {
            return 0.0;
        }
        self.used as f64 / self.quota as f64
    }

    pub fn percent(&self) -> f64 {
        self.ratio() * 100.0
    }
}

/// Namespaced key/value store that survives process restarts.
///
/// Namespaces partition the keyspace: the response cache and the mutation
/// queue share one store without seeing each other's keys. All operations
/// are synchronous to match rusqlite's API.
pub trait PersistentStore: Send + Sync {
    /// Read a value.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace a value.
    ///
    /// Fails with `QuotaExceeded` if the write would push total usage above
    /// the quota; the previous value (if any) is kept in that case.
    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a value. Returns whether it existed.
    fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// All entries of a namespace, ordered by key.
    fn list_all(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Remove every entry in a namespace. Returns the number removed.
    fn clear_namespace(&self, namespace: &str) -> Result<usize>;

    /// Current usage across all namespaces.
    fn usage(&self) -> Result<StorageUsage>;
}
