//! Namespaced persistent key/value storage.
//!
//! The response cache and the mutation queue share one store, partitioned by
//! namespace:
//! - `cache` holds serialized [`CacheEntry`](crate::cache::CacheEntry) records
//! - `queue` holds serialized [`QueuedMutation`](crate::queue::QueuedMutation) records

pub(crate) mod encoding;
mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{PersistentStore, StorageUsage, StoreConfig};

/// Namespace holding cached responses.
pub const CACHE_NAMESPACE: &str = "cache";
/// Namespace holding queued mutations.
pub const QUEUE_NAMESPACE: &str = "queue";

/// Shared handle to a store.
pub type DynStore = std::sync::Arc<dyn PersistentStore>;
