//! Shared fixtures: a scripted transport and a fully wired orchestrator.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_core::network::{ConnectivityProbe, CredentialProvider};
use tether_core::{
    CircuitBreakerConfig, HttpResponse, LinkHints, ManualClock, MemoryStore, NetworkMonitor,
    RequestDescriptor, RequestOrchestrator, RequestOrchestratorBuilder, Result, RetryPolicy,
    TetherError, Transport,
};

/// What the scripted transport does for one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(u16, String),
    /// Respond after a delay.
    Delayed(Duration, u16, String),
    /// No response: connection failure.
    Fail,
    /// Never answers.
    Hang,
}

pub fn ok(body: &str) -> Reply {
    Reply::Respond(200, body.to_string())
}

pub fn status(code: u16) -> Reply {
    Reply::Respond(code, String::new())
}

/// Transport that answers from a script and records every request.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    sent: Mutex<Vec<RequestDescriptor>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(ok("{}")),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn push_n(&self, n: usize, reply: Reply) {
        for _ in 0..n {
            self.push(reply.clone());
        }
    }

    /// Reply used once the script runs out.
    pub fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock().unwrap() = reply;
    }

    pub fn sent(&self) -> Vec<RequestDescriptor> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Decoded JSON payloads, in send order.
    pub fn sent_payloads(&self) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter_map(|r| r.payload)
            .map(|p| serde_json::from_slice(&p).unwrap())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<HttpResponse> {
        self.sent.lock().unwrap().push(request.clone());
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone());

        match reply {
            Reply::Respond(status, body) => Ok(HttpResponse::new(status, body.into_bytes())),
            Reply::Delayed(delay, status, body) => {
                tokio::time::sleep(delay).await;
                Ok(HttpResponse::new(status, body.into_bytes()))
            }
            Reply::Fail => Err(TetherError::network("connection refused")),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Credentials that hand out `token-N`, bumping N on every refresh.
pub struct RotatingCredentials {
    generation: AtomicU32,
    pub refreshes: AtomicU32,
}

impl RotatingCredentials {
    pub fn new() -> Self {
        Self {
            generation: AtomicU32::new(0),
            refreshes: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CredentialProvider for RotatingCredentials {
    async fn get_token(&self) -> Result<Option<String>> {
        Ok(Some(format!("token-{}", self.generation.load(Ordering::SeqCst))))
    }

    async fn refresh_token(&self) -> Result<String> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("token-{}", next))
    }
}

/// Probe that always reports the same thing.
pub struct FixedProbe(pub bool);

#[async_trait]
impl ConnectivityProbe for FixedProbe {
    async fn probe(&self) -> LinkHints {
        if self.0 {
            LinkHints::online()
        } else {
            LinkHints::offline()
        }
    }
}

pub const BASE_URL: &str = "https://api.test/v1";

pub struct Harness {
    pub orchestrator: RequestOrchestrator,
    pub transport: Arc<ScriptedTransport>,
    pub clock: ManualClock,
    pub monitor: Arc<NetworkMonitor>,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub fn go_offline(&self) {
        self.monitor.report(LinkHints::offline());
    }

    pub fn go_online(&self) {
        self.monitor.report(LinkHints::online());
    }
}

/// Orchestrator with default policies over scripted collaborators.
pub fn harness() -> Harness {
    harness_with(|builder| builder)
}

/// Like [`harness`], with one attempt per call and a breaker that never opens.
pub fn single_attempt_harness() -> Harness {
    harness_with(|builder| {
        builder
            .with_retry_policy(RetryPolicy::none())
            .with_breaker_config(CircuitBreakerConfig {
                failure_threshold: 1_000,
                ..CircuitBreakerConfig::default()
            })
    })
}

pub fn harness_with(
    configure: impl FnOnce(RequestOrchestratorBuilder) -> RequestOrchestratorBuilder,
) -> Harness {
    harness_with_monitor(Arc::new(NetworkMonitor::default()), configure)
}

pub fn harness_with_monitor(
    monitor: Arc<NetworkMonitor>,
    configure: impl FnOnce(RequestOrchestratorBuilder) -> RequestOrchestratorBuilder,
) -> Harness {
    let transport = Arc::new(ScriptedTransport::new());
    let clock = ManualClock::new();
    let store = Arc::new(MemoryStore::new());

    let builder = RequestOrchestrator::builder(BASE_URL)
        .with_transport(transport.clone())
        .with_store(store.clone())
        .with_clock(Arc::new(clock.clone()))
        .with_monitor(Arc::clone(&monitor));
    let orchestrator = configure(builder).build().unwrap();

    Harness {
        orchestrator,
        transport,
        clock,
        monitor,
        store,
    }
}

/// Poll until `condition` holds, letting spawned tasks run.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
