//! Network utilities for connectivity, retries, and resilience.
//!
//! This module provides:
//! - Connectivity and link quality monitoring
//! - Circuit breaker pattern, one breaker per upstream target
//! - Retry logic with exponential backoff
//! - The transport and credential seams used by the orchestrator

mod auth;
mod circuit_breaker;
mod monitor;
mod retry;
mod transport;

pub use auth::{CredentialProvider, NoCredentials, StaticCredentials};
pub use circuit_breaker::{
    target_of, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitBreakerStats, CircuitState,
};
pub use monitor::{
    ConnectivityConfig, ConnectivityProbe, DataMode, HttpProbe, LinkHints, LinkQuality,
    NetworkListener, NetworkMonitor, NetworkSnapshot, Subscription,
};
pub use retry::{retry_async, RetryPolicy, RetryStats};
pub use transport::{HttpResponse, Method, ReqwestTransport, RequestDescriptor, Transport};
