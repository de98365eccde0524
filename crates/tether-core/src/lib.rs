//! Tether Core - client-side resilience layer for unreliable networks.
//!
//! This crate shields application code from transient and sustained backend
//! failures. It decides when to call the network, when to serve a cached
//! answer, when to refuse to call at all, and durably records writes that
//! could not be sent so they can be replayed once connectivity returns.
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_core::{GetOptions, RequestOrchestrator, WriteOptions};
//!
//! #[tokio::main]
//! async fn main() -> tether_core::Result<()> {
//!     let orchestrator = RequestOrchestrator::builder("https://api.example.com/v1").build()?;
//!     orchestrator.init();
//!
//!     let inbox: tether_core::Fetched<serde_json::Value> =
//!         orchestrator.get("/inbox", GetOptions::default()).await?;
//!     println!("cached: {}", inbox.cached);
//!
//!     let sent: tether_core::Written<serde_json::Value> = orchestrator
//!         .post("/chat", &serde_json::json!({"text": "hi"}), WriteOptions::new().with_mutation_id("msg-1"))
//!         .await?;
//!     println!("queued for later: {}", sent.is_queued());
//!
//!     orchestrator.dispose();
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod network;
pub mod orchestrator;
pub mod queue;
pub mod store;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheEntry, CacheUsage, ResponseCache};
pub use cancel::CancellationToken;
pub use clock::{Clock, DynClock, ManualClock, SystemClock};
pub use config::TetherSettings;
pub use error::{Result, TetherError};
pub use network::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, ConnectivityConfig,
    CredentialProvider, DataMode, HttpResponse, LinkHints, LinkQuality, Method, NetworkMonitor,
    NetworkSnapshot, RequestDescriptor, RetryPolicy, StaticCredentials, Transport,
};
pub use orchestrator::{
    Fetched, GetOptions, RequestOrchestrator, RequestOrchestratorBuilder, WriteOptions, Written,
};
pub use queue::{MutationQueue, QueueConfig, QueueEvent, QueuedMutation, ReplayReport};
pub use store::{DynStore, MemoryStore, PersistentStore, SqliteStore, StorageUsage, StoreConfig};
