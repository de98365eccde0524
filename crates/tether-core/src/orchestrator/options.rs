//! Per-call options and results.

use crate::cancel::CancellationToken;
use crate::network::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for a GET.
#[derive(Debug, Clone)]
pub struct GetOptions {
    /// Read from and write to the response cache.
    pub cache: bool,
    /// Skip the initial cache lookup but still fall back to it on failure.
    pub refresh: bool,
    pub query: Vec<(String, String)>,
    /// Overrides the monitor's recommended timeout.
    pub timeout: Option<Duration>,
    /// Overrides the orchestrator's retry policy.
    pub retry: Option<RetryPolicy>,
    /// Overrides the cache's default TTL for the stored response.
    pub cache_ttl: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            cache: true,
            refresh: false,
            query: Vec::new(),
            timeout: None,
            retry: None,
            cache_ttl: None,
            cancel: None,
        }
    }
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    pub fn refresh(mut self) -> Self {
        self.refresh = true;
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Options for POST, PUT and DELETE.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Stable id of the logical user action. A random one is generated when
    /// absent; pass one to make offline retries of the same action
    /// replace rather than duplicate.
    pub mutation_id: Option<String>,
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub cancel: Option<CancellationToken>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mutation_id(mut self, id: impl Into<String>) -> Self {
        self.mutation_id = Some(id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Result of a GET.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fetched<T> {
    pub data: T,
    /// Whether `data` came from the cache rather than the network.
    pub cached: bool,
}

/// Result of a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Written<T> {
    /// Delivered; the decoded response body.
    Sent { data: T },
    /// Stored for replay once connectivity returns.
    Queued { mutation_id: String },
}

impl<T> Written<T> {
    pub fn is_queued(&self) -> bool {
        matches!(self, Written::Queued { .. })
    }

    pub fn into_sent(self) -> Option<T> {
        match self {
            Written::Sent { data } => Some(data),
            Written::Queued { .. } => None,
        }
    }
}
