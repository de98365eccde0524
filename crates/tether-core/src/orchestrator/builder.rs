//! Builder for configuring a RequestOrchestrator.

use super::dispatch::Dispatcher;
use super::RequestOrchestrator;
use crate::cache::{CacheConfig, ResponseCache};
use crate::clock::{system_clock, DynClock};
use crate::config::TetherSettings;
use crate::error::{Result, TetherError};
use crate::network::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CredentialProvider, NetworkMonitor,
    NoCredentials, ReqwestTransport, RetryPolicy, Transport,
};
use crate::queue::{MutationQueue, QueueConfig};
use crate::store::{DynStore, MemoryStore};
use std::sync::{Arc, Mutex};

/// Builder for configuring a [`RequestOrchestrator`].
///
/// Every collaborator has a default: a reqwest transport, anonymous
/// credentials, an in-memory store, the system clock and a monitor without
/// a probe.
///
/// # Example
///
/// ```rust,ignore
/// use tether_core::{RequestOrchestrator, SqliteStore};
/// use std::sync::Arc;
///
/// let orchestrator = RequestOrchestrator::builder("https://api.example.com/v1")
///     .with_store(Arc::new(SqliteStore::open("tether.sqlite")?))
///     .build()?;
/// orchestrator.init();
/// ```
pub struct RequestOrchestratorBuilder {
    base_url: String,
    transport: Option<Arc<dyn Transport>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    store: Option<DynStore>,
    clock: Option<DynClock>,
    monitor: Option<Arc<NetworkMonitor>>,
    breaker_config: CircuitBreakerConfig,
    retry: RetryPolicy,
    cache_config: CacheConfig,
    queue_config: QueueConfig,
}

impl RequestOrchestratorBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            transport: None,
            credentials: None,
            store: None,
            clock: None,
            monitor: None,
            breaker_config: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            cache_config: CacheConfig::default(),
            queue_config: QueueConfig::default(),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Store shared by the response cache and the mutation queue.
    pub fn with_store(mut self, store: DynStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: DynClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<NetworkMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn with_queue_config(mut self, config: QueueConfig) -> Self {
        self.queue_config = config;
        self
    }

    /// Apply every component setting from a settings file.
    ///
    /// The store and monitor are not created here; pass them separately.
    pub fn with_settings(self, settings: &TetherSettings) -> Self {
        self.with_breaker_config(settings.breaker_config())
            .with_retry_policy(settings.retry_policy())
            .with_cache_config(settings.cache_config())
            .with_queue_config(settings.queue_config())
    }

    /// Build the orchestrator. Does not start any background task; call
    /// [`RequestOrchestrator::init`] for that.
    pub fn build(self) -> Result<RequestOrchestrator> {
        let parsed = url::Url::parse(&self.base_url).map_err(|e| TetherError::Config {
            message: format!("Invalid base URL {}: {}", self.base_url, e),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TetherError::Config {
                message: format!("Base URL must be http or https: {}", self.base_url),
            });
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let credentials: Arc<dyn CredentialProvider> = match self.credentials {
            Some(credentials) => credentials,
            None => Arc::new(NoCredentials),
        };
        let store: DynStore = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let clock = self.clock.unwrap_or_else(system_clock);
        let monitor = self
            .monitor
            .unwrap_or_else(|| Arc::new(NetworkMonitor::default()));

        let breakers = CircuitBreakerRegistry::new(self.breaker_config, Arc::clone(&clock));
        let dispatcher = Arc::new(Dispatcher::new(
            self.base_url,
            transport,
            credentials,
            breakers,
            Arc::clone(&monitor),
            self.retry,
        ));

        let cache = ResponseCache::new(Arc::clone(&store), Arc::clone(&clock), self.cache_config);
        let queue = Arc::new(MutationQueue::new(store, clock, self.queue_config));

        Ok(RequestOrchestrator {
            dispatcher,
            cache,
            queue,
            monitor,
            worker: Mutex::new(None),
        })
    }
}
