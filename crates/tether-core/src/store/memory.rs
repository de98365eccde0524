//! In-process store with the same quota semantics as [`SqliteStore`].
//!
//! [`SqliteStore`]: super::SqliteStore

use super::traits::{PersistentStore, StorageUsage, StoreConfig};
use crate::error::{Result, TetherError};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

type Key = (String, String);

/// Volatile store, used in tests and when no database path is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<Key, Vec<u8>>>,
    config: StoreConfig,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            config: StoreConfig { quota_bytes },
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Key, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn used(entries: &BTreeMap<Key, Vec<u8>>) -> u64 {
        entries.values().map(|v| v.len() as u64).sum()
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .lock()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.lock();
        let k = (namespace.to_string(), key.to_string());

        let used = Self::used(&entries);
        let existing = entries.get(&k).map(|v| v.len() as u64).unwrap_or(0);
        let needed = value.len() as u64;
        if used - existing + needed > self.config.quota_bytes {
            return Err(TetherError::QuotaExceeded {
                used,
                quota: self.config.quota_bytes,
                needed,
            });
        }

        entries.insert(k, value.to_vec());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self
            .lock()
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some())
    }

    fn list_all(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .lock()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect())
    }

    fn clear_namespace(&self, namespace: &str) -> Result<usize> {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(ns, _), _| ns != namespace);
        Ok(before - entries.len())
    }

    fn usage(&self) -> Result<StorageUsage> {
        Ok(StorageUsage {
            used: Self::used(&self.lock()),
            quota: self.config.quota_bytes,
        })
    }
}
