//! Response cache for GET requests.
//!
//! Entries live in the `cache` namespace of the shared persistent store,
//! keyed by a hash of the request's base URL, path and sorted query.

mod key;
mod response;
mod types;

pub use key::cache_key;
pub use response::ResponseCache;
pub use types::{CacheConfig, CacheEntry, CacheUsage};
