//! The send path shared by live calls and queue replay.
//!
//! Per attempt: circuit breaker admission, bearer token and timeout. A 401
//! triggers at most one credential refresh per call. Attempts are wrapped by
//! the retry policy and, when given, a cancellation token.

use crate::cancel::CancellationToken;
use crate::error::{Result, TetherError};
use crate::network::{
    retry_async, CircuitBreakerRegistry, CredentialProvider, HttpResponse, NetworkMonitor,
    RequestDescriptor, RetryPolicy, Transport,
};
use crate::queue::{MutationSender, QueuedMutation, SendVerdict};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

pub(crate) struct Dispatcher {
    base_url: String,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    breakers: CircuitBreakerRegistry,
    monitor: Arc<NetworkMonitor>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub(crate) fn new(
        base_url: String,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
        breakers: CircuitBreakerRegistry,
        monitor: Arc<NetworkMonitor>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            base_url,
            transport,
            credentials,
            breakers,
            monitor,
            retry,
        }
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Resolve `path` against the base URL and append query parameters.
    ///
    /// Absolute `http(s)` URLs are used as given.
    pub(crate) fn url_for(&self, path: &str, query: &[(String, String)]) -> Result<String> {
        let joined = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.is_empty() {
            self.base_url.clone()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        };

        let mut url = url::Url::parse(&joined).map_err(|e| TetherError::Config {
            message: format!("Invalid request URL {}: {}", joined, e),
        })?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Ok(url.to_string())
    }

    /// Run a request under the retry policy, honoring cancellation.
    pub(crate) async fn execute(
        &self,
        request: &RequestDescriptor,
        retry: &RetryPolicy,
        cancel: Option<&CancellationToken>,
    ) -> Result<HttpResponse> {
        self.execute_tracked(request, retry, cancel, &CallProgress::default())
            .await
    }

    /// Like [`execute`](Self::execute), recording into `progress` whether
    /// any attempt got past the breaker.
    async fn execute_tracked(
        &self,
        request: &RequestDescriptor,
        retry: &RetryPolicy,
        cancel: Option<&CancellationToken>,
        progress: &CallProgress,
    ) -> Result<HttpResponse> {
        let run = async {
            let (result, stats) = retry_async(retry, || self.attempt(request, progress)).await;
            if stats.attempts > 1 {
                debug!(
                    "{} {} finished after {} attempts ({:?} backoff)",
                    request.method, request.url, stats.attempts, stats.total_delay
                );
            }
            result
        };

        match cancel {
            Some(token) => token.run(run).await,
            None => run.await,
        }
    }

    /// One attempt through the target's circuit breaker.
    async fn attempt(
        &self,
        request: &RequestDescriptor,
        progress: &CallProgress,
    ) -> Result<HttpResponse> {
        let breaker = self.breakers.breaker_for_url(&request.url);
        let permit = breaker.acquire()?;
        progress.transmitted.store(true, Ordering::SeqCst);
        let result = self.send_authorized(request, progress).await;
        permit.record(&result);
        result
    }

    async fn send_authorized(
        &self,
        request: &RequestDescriptor,
        progress: &CallProgress,
    ) -> Result<HttpResponse> {
        let mut request = request.clone();
        if let Some(token) = self.credentials.get_token().await? {
            request.set_header("Authorization", format!("Bearer {}", token));
        }

        let response = self.send_with_timeout(&request).await?;
        // One refresh per call, however many attempts it takes
        if response.status != 401 || progress.refreshed.swap(true, Ordering::SeqCst) {
            return response.into_result();
        }

        debug!("{} {} returned 401, refreshing credentials", request.method, request.url);
        let token = self.credentials.refresh_token().await?;
        request.set_header("Authorization", format!("Bearer {}", token));
        self.send_with_timeout(&request).await?.into_result()
    }

    async fn send_with_timeout(&self, request: &RequestDescriptor) -> Result<HttpResponse> {
        match tokio::time::timeout(request.timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TetherError::Timeout(request.timeout)),
        }
    }
}

/// Shared across the attempts of one call.
#[derive(Debug, Default)]
struct CallProgress {
    /// Some attempt was admitted by the breaker and sent.
    transmitted: AtomicBool,
    refreshed: AtomicBool,
}

impl CallProgress {
    fn transmitted(&self) -> bool {
        self.transmitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MutationSender for Dispatcher {
    async fn send(&self, mutation: &QueuedMutation) -> SendVerdict {
        if !self.monitor.is_online() {
            return SendVerdict::Deferred {
                reason: "offline".to_string(),
            };
        }

        let mut request = RequestDescriptor::new(
            mutation.method,
            mutation.url.clone(),
            self.monitor.recommended_timeout(),
        );
        if !mutation.payload.is_empty() {
            request = request.with_payload(mutation.payload.clone());
        }
        request.set_header(IDEMPOTENCY_HEADER, mutation.id.clone());

        let progress = CallProgress::default();
        match self
            .execute_tracked(&request, &self.retry, None, &progress)
            .await
        {
            Ok(_) => SendVerdict::Delivered,
            // Nothing reached the server, so the attempt does not count
            Err(e) if e.is_circuit_rejection() && !progress.transmitted() => SendVerdict::Deferred {
                reason: e.to_string(),
            },
            Err(TetherError::Client { status, .. }) => SendVerdict::Rejected { status },
            Err(e) => {
                warn!("Replay of {} failed: {}", mutation.id, e);
                SendVerdict::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
