//! SQLite-backed persistent store.

use super::traits::{PersistentStore, StorageUsage, StoreConfig};
use crate::error::{Result, TetherError};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// SQLite-based store.
///
/// One database file holds every namespace. Thread-safe via an internal
/// mutex on the connection; no lock is ever held across an await point
/// because the API is synchronous.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    config: StoreConfig,
}

impl SqliteStore {
    /// Open (or create) a store at the given path with the default quota.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(db_path, StoreConfig::default())
    }

    pub fn with_config(db_path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TetherError::Io {
                message: format!("Failed to create store directory: {}", e),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| TetherError::Database {
            message: format!("Failed to open store database: {}", e),
            source: Some(e),
        })?;

        Self::from_connection(conn, config)
    }

    fn from_connection(conn: Connection, config: StoreConfig) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| TetherError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        let store = Self {
            conn: Mutex::new(conn),
            config,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS store_entries (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                size_bytes INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            );

            CREATE INDEX IF NOT EXISTS idx_store_size
                ON store_entries(namespace, size_bytes);
            "#,
        )
        .map_err(|e| TetherError::Database {
            message: format!("Failed to initialize store schema: {}", e),
            source: Some(e),
        })?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| TetherError::Database {
            message: format!("Failed to lock database: {}", e),
            source: None,
        })
    }

    fn total_size(conn: &Connection) -> Result<u64> {
        let size: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(size_bytes), 0) FROM store_entries",
                [],
                |row| row.get(0),
            )
            .map_err(|e| TetherError::Database {
                message: format!("Failed to compute store size: {}", e),
                source: Some(e),
            })?;
        Ok(size.max(0) as u64)
    }
}

impl PersistentStore for SqliteStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT value FROM store_entries WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| TetherError::Database {
            message: format!("Failed to read {}:{}: {}", namespace, key, e),
            source: Some(e),
        })
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.lock()?;

        let existing: i64 = conn
            .query_row(
                "SELECT size_bytes FROM store_entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| TetherError::Database {
                message: format!("Failed to read entry size: {}", e),
                source: Some(e),
            })?
            .unwrap_or(0);

        let used = Self::total_size(&conn)?;
        let needed = value.len() as u64;
        let after = used.saturating_sub(existing.max(0) as u64) + needed;
        if after > self.config.quota_bytes {
            return Err(TetherError::QuotaExceeded {
                used,
                quota: self.config.quota_bytes,
                needed,
            });
        }

        conn.execute(
            r#"
            INSERT OR REPLACE INTO store_entries (namespace, key, value, size_bytes)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![namespace, key, value, needed as i64],
        )
        .map_err(|e| TetherError::Database {
            message: format!("Failed to write {}:{}: {}", namespace, key, e),
            source: Some(e),
        })?;

        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let conn = self.lock()?;

        let deleted = conn
            .execute(
                "DELETE FROM store_entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
            )
            .map_err(|e| TetherError::Database {
                message: format!("Failed to delete {}:{}: {}", namespace, key, e),
                source: Some(e),
            })?;

        Ok(deleted > 0)
    }

    fn list_all(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare("SELECT key, value FROM store_entries WHERE namespace = ?1 ORDER BY key")
            .map_err(|e| TetherError::Database {
                message: format!("Failed to prepare list query: {}", e),
                source: Some(e),
            })?;

        let rows = stmt
            .query_map(params![namespace], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| TetherError::Database {
                message: format!("Failed to list namespace {}: {}", namespace, e),
                source: Some(e),
            })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn clear_namespace(&self, namespace: &str) -> Result<usize> {
        let conn = self.lock()?;

        let deleted = conn
            .execute(
                "DELETE FROM store_entries WHERE namespace = ?1",
                params![namespace],
            )
            .map_err(|e| TetherError::Database {
                message: format!("Failed to clear namespace: {}", e),
                source: Some(e),
            })?;

        debug!("Cleared {} entries from namespace '{}'", deleted, namespace);
        Ok(deleted)
    }

    fn usage(&self) -> Result<StorageUsage> {
        let conn = self.lock()?;
        Ok(StorageUsage {
            used: Self::total_size(&conn)?,
            quota: self.config.quota_bytes,
        })
    }
}
