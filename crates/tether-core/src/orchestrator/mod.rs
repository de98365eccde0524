//! RequestOrchestrator - the single entry point for application requests.
//!
//! Every call flows through the same pipeline:
//! 1. Reads consult the response cache first
//! 2. Offline calls skip the network: reads fall back to cache, writes queue
//! 3. Online calls pass the target's circuit breaker and the retry policy
//! 4. A network-level failure asks the monitor to confirm connectivity; if
//!    the device turns out to be offline, writes are queued for replay

mod builder;
mod dispatch;
mod options;

pub use builder::RequestOrchestratorBuilder;
pub use options::{Fetched, GetOptions, WriteOptions, Written};

use crate::cache::{cache_key, ResponseCache};
use crate::error::{Result, TetherError};
use crate::network::{
    CircuitBreakerStats, Method, NetworkMonitor, NetworkSnapshot, RequestDescriptor, Subscription,
};
use crate::queue::{MutationQueue, ReplayReport};
use dispatch::{Dispatcher, IDEMPOTENCY_HEADER};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Background replay machinery started by [`RequestOrchestrator::init`].
struct ReplayWorker {
    handle: JoinHandle<()>,
    _subscription: Subscription,
    /// `init` started the monitor's background loop, so `dispose` stops it.
    owns_monitoring: bool,
}

/// Resilient request orchestrator.
///
/// Composes the network monitor, per-target circuit breakers, retry policy,
/// response cache and mutation queue behind `get`/`post`/`put`/`delete`.
pub struct RequestOrchestrator {
    dispatcher: Arc<Dispatcher>,
    cache: ResponseCache,
    queue: Arc<MutationQueue>,
    monitor: Arc<NetworkMonitor>,
    worker: Mutex<Option<ReplayWorker>>,
}

impl RequestOrchestrator {
    /// Start configuring an orchestrator for the given base URL.
    pub fn builder(base_url: impl Into<String>) -> RequestOrchestratorBuilder {
        RequestOrchestratorBuilder::new(base_url)
    }

    // === Lifecycle ===

    /// Start background connectivity monitoring and the replay worker.
    ///
    /// Every transition to online (including being online right now)
    /// triggers a replay pass. Must be called within a Tokio runtime.
    /// Calling it again is a no-op until [`dispose`](Self::dispose).
    pub fn init(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            debug!("Orchestrator already initialized");
            return;
        }

        let owns_monitoring = !self.monitor.is_monitoring();
        self.monitor.start();

        let (trigger, mut triggered) = mpsc::unbounded_channel::<()>();
        let was_online = AtomicBool::new(false);
        let subscription = self.monitor.subscribe(move |snapshot: &NetworkSnapshot| {
            let previously = was_online.swap(snapshot.online, Ordering::SeqCst);
            if snapshot.online && !previously {
                let _ = trigger.send(());
            }
        });

        let queue = Arc::clone(&self.queue);
        let dispatcher = Arc::clone(&self.dispatcher);
        let handle = tokio::spawn(async move {
            while triggered.recv().await.is_some() {
                // Collapse bursts of transitions into one pass
                while triggered.try_recv().is_ok() {}

                match queue.replay(dispatcher.as_ref()).await {
                    Ok(report) if report.delivered + report.discarded + report.retained > 0 => {
                        info!(
                            "Replay pass: {} delivered, {} discarded, {} retained, {} remaining",
                            report.delivered, report.discarded, report.retained, report.remaining
                        );
                    }
                    Ok(_) => debug!("Replay pass found nothing to deliver"),
                    Err(e) => warn!("Replay pass failed: {}", e),
                }
            }
        });

        *worker = Some(ReplayWorker {
            handle,
            _subscription: subscription,
            owns_monitoring,
        });
        info!("Request orchestrator initialized for {}", self.dispatcher.base_url());
    }

    /// Stop the replay worker, and background monitoring if `init`
    /// started it. A monitor shared with other owners keeps running.
    pub fn dispose(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(worker) = worker else {
            return;
        };

        worker.handle.abort();
        drop(worker._subscription);
        if worker.owns_monitoring {
            self.monitor.stop();
        }
        debug!("Request orchestrator disposed");
    }

    pub fn is_initialized(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    // === Requests ===

    /// GET `path` and decode the JSON response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str, options: GetOptions) -> Result<Fetched<T>> {
        if let Some(token) = &options.cancel {
            token.check()?;
        }

        let key = cache_key(self.dispatcher.base_url(), path, &options.query);
        if options.cache && !options.refresh {
            if let Some(body) = self.cached_body(&key) {
                debug!("Cache hit for GET {}", path);
                return Ok(Fetched {
                    data: decode(&body)?,
                    cached: true,
                });
            }
        }

        if !self.monitor.is_online() {
            return self.offline_read(path, &key, &options);
        }

        let url = self.dispatcher.url_for(path, &options.query)?;
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.monitor.recommended_timeout());
        let request = RequestDescriptor::new(Method::Get, url, timeout);
        let retry = options
            .retry
            .as_ref()
            .unwrap_or_else(|| self.dispatcher.retry_policy());

        match self
            .dispatcher
            .execute(&request, retry, options.cancel.as_ref())
            .await
        {
            Ok(response) => {
                let data = decode(&response.body)?;
                if options.cache {
                    if let Err(e) = self.cache.set(&key, &response.body, options.cache_ttl) {
                        warn!("Failed to cache response for GET {}: {}", path, e);
                    }
                }
                Ok(Fetched {
                    data,
                    cached: false,
                })
            }
            Err(e) => {
                if e.is_network_level() && !self.monitor.confirm().await.online {
                    return self.offline_read(path, &key, &options);
                }
                if options.cache && e.allows_cache_fallback() {
                    if let Some(body) = self.cached_body(&key) {
                        warn!("GET {} failed ({}), serving cached response", path, e);
                        return Ok(Fetched {
                            data: decode(&body)?,
                            cached: true,
                        });
                    }
                }
                Err(e)
            }
        }
    }

    /// POST a JSON body to `path`.
    pub async fn post<B, T>(&self, path: &str, body: &B, options: WriteOptions) -> Result<Written<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)?;
        self.write(Method::Post, path, Some(payload), options).await
    }

    /// PUT a JSON body to `path`.
    pub async fn put<B, T>(&self, path: &str, body: &B, options: WriteOptions) -> Result<Written<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)?;
        self.write(Method::Put, path, Some(payload), options).await
    }

    /// DELETE `path`.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str, options: WriteOptions) -> Result<Written<T>> {
        self.write(Method::Delete, path, None, options).await
    }

    async fn write<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        payload: Option<Vec<u8>>,
        options: WriteOptions,
    ) -> Result<Written<T>> {
        if let Some(token) = &options.cancel {
            token.check()?;
        }

        let url = self.dispatcher.url_for(path, &[])?;
        let mutation_id = options
            .mutation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if !self.monitor.is_online() {
            return self.enqueue(mutation_id, method, url, payload);
        }

        let timeout = options
            .timeout
            .unwrap_or_else(|| self.monitor.recommended_timeout());
        let mut request = RequestDescriptor::new(method, url.clone(), timeout);
        if let Some(payload) = &payload {
            request = request.with_payload(payload.clone());
        }
        request.set_header(IDEMPOTENCY_HEADER, mutation_id.clone());

        let retry = options
            .retry
            .as_ref()
            .unwrap_or_else(|| self.dispatcher.retry_policy());

        match self
            .dispatcher
            .execute(&request, retry, options.cancel.as_ref())
            .await
        {
            Ok(response) => Ok(Written::Sent {
                data: decode(&response.body)?,
            }),
            Err(e) if e.is_network_level() => {
                if self.monitor.confirm().await.online {
                    return Err(e);
                }
                debug!("{} {} failed while offline: {}", method, url, e);
                self.enqueue(mutation_id, method, url, payload)
            }
            Err(e) => Err(e),
        }
    }

    fn offline_read<T: DeserializeOwned>(
        &self,
        path: &str,
        key: &str,
        options: &GetOptions,
    ) -> Result<Fetched<T>> {
        if options.cache {
            if let Some(body) = self.cached_body(key) {
                debug!("Offline, serving cached response for GET {}", path);
                return Ok(Fetched {
                    data: decode(&body)?,
                    cached: true,
                });
            }
        }
        Err(TetherError::network(format!(
            "Network unavailable and no cached data for {}",
            path
        )))
    }

    fn enqueue<T>(
        &self,
        mutation_id: String,
        method: Method,
        url: String,
        payload: Option<Vec<u8>>,
    ) -> Result<Written<T>> {
        let payload = payload.unwrap_or_default();
        let queued = match self
            .queue
            .enqueue(mutation_id.clone(), method, url.clone(), payload.clone())
        {
            Err(TetherError::QuotaExceeded { .. }) => {
                // Pending writes outrank cached reads
                self.cache.evict_oldest()?;
                self.queue.enqueue(mutation_id.clone(), method, url, payload)
            }
            other => other,
        }?;

        info!(
            "Offline: queued {} {} as {}",
            queued.method, queued.url, queued.id
        );
        Ok(Written::Queued { mutation_id })
    }

    fn cached_body(&self, key: &str) -> Option<Vec<u8>> {
        match self.cache.get(key) {
            Ok(body) => body,
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    // === Diagnostics ===

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    pub fn base_url(&self) -> &str {
        self.dispatcher.base_url()
    }

    /// Circuit breaker stats for every target contacted so far.
    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        self.dispatcher.breakers().stats()
    }

    /// Run a replay pass now, regardless of connectivity transitions.
    pub async fn replay_now(&self) -> Result<ReplayReport> {
        self.queue.replay(self.dispatcher.as_ref()).await
    }
}

impl Drop for RequestOrchestrator {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Decode a JSON body; an empty body decodes as `null`.
fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_slice(b"null")?);
    }
    Ok(serde_json::from_slice(body)?)
}
