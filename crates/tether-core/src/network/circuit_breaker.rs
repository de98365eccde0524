//! Circuit breaker pattern for network resilience.
//!
//! - CLOSED: normal operation, requests flow through
//! - OPEN: failing, requests are rejected immediately until the cooldown ends
//! - HALF_OPEN: testing recovery, exactly one trial request in flight
//!
//! All state sits behind a single mutex that is never held across an await,
//! so admission is a single check-and-set step.

use crate::clock::DynClock;
use crate::config::NetworkConfig;
use crate::error::{Result, TetherError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Consecutive trial successes needed to close from half-open.
    pub success_threshold: u32,
    /// Time to stay open before admitting a trial call.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: NetworkConfig::CIRCUIT_BREAKER_FAILURE_THRESHOLD,
            success_threshold: NetworkConfig::CIRCUIT_BREAKER_SUCCESS_THRESHOLD,
            cooldown: NetworkConfig::CIRCUIT_BREAKER_COOLDOWN,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    next_attempt_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    total_failures: u64,
    total_successes: u64,
    total_rejections: u64,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            next_attempt_at: None,
            trial_in_flight: false,
            total_failures: 0,
            total_successes: 0,
            total_rejections: 0,
        }
    }
}

/// Circuit breaker guarding one upstream target.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    target: String,
    clock: DynClock,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, clock: DynClock) -> Self {
        Self::with_config(target, CircuitBreakerConfig::default(), clock)
    }

    pub fn with_config(
        target: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: DynClock,
    ) -> Self {
        Self {
            config,
            target: target.into(),
            clock,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Current state as last recorded.
    ///
    /// An open breaker whose cooldown has elapsed still reports `Open` until
    /// a caller attempts execution.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Ask for permission to make one call.
    ///
    /// Fails with `CircuitOpen` while cooling down, and with
    /// `CircuitTesting` while a half-open trial call is already in flight.
    pub fn acquire(&self) -> Result<CallPermit<'_>> {
        let now = self.clock.now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, false)),
            CircuitState::Open => {
                let ready = inner.next_attempt_at.map(|at| now >= at).unwrap_or(true);
                if !ready {
                    inner.total_rejections += 1;
                    return Err(TetherError::CircuitOpen {
                        target: self.target.clone(),
                    });
                }
                inner.state = CircuitState::HalfOpen;
                inner.consecutive_successes = 0;
                inner.trial_in_flight = true;
                debug!("Circuit breaker for {} entering HALF_OPEN", self.target);
                Ok(CallPermit::new(self, true))
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.total_rejections += 1;
                    return Err(TetherError::CircuitTesting {
                        target: self.target.clone(),
                    });
                }
                inner.trial_in_flight = true;
                Ok(CallPermit::new(self, true))
            }
        }
    }

    /// Get statistics about this circuit breaker.
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        CircuitBreakerStats {
            target: self.target.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            next_attempt_at: inner.next_attempt_at,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            total_rejections: inner.total_rejections,
        }
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let totals = (inner.total_failures, inner.total_successes, inner.total_rejections);
        *inner = BreakerState::closed();
        (inner.total_failures, inner.total_successes, inner.total_rejections) = totals;
        info!("Circuit breaker for {} reset to CLOSED", self.target);
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        inner.total_successes += 1;

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen if trial => {
                inner.trial_in_flight = false;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.next_attempt_at = None;
                    info!("Circuit breaker for {} recovered to CLOSED", self.target);
                }
            }
            // Late results from calls admitted before the circuit opened
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        inner.total_failures += 1;

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            }
            CircuitState::HalfOpen if trial => {
                inner.trial_in_flight = false;
                self.open(&mut inner);
            }
            _ => {}
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn open(&self, inner: &mut BreakerState) {
        let cooldown = chrono::Duration::from_std(self.config.cooldown)
            .unwrap_or_else(|_| chrono::Duration::zero());
        inner.state = CircuitState::Open;
        inner.consecutive_successes = 0;
        inner.next_attempt_at = Some(self.clock.now() + cooldown);
        warn!(
            "Circuit breaker for {} opened after {} consecutive failures",
            self.target, inner.consecutive_failures
        );
    }
}

/// Permission to make one call through a breaker.
///
/// Report the outcome with [`succeed`](Self::succeed) or
/// [`fail`](Self::fail). A permit dropped without a verdict (for example
/// when the call was cancelled) frees the half-open trial slot without
/// counting toward either threshold.
#[must_use = "report the call outcome on the permit"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Whether this is the single half-open trial call.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }

    /// Record the outcome of a call.
    ///
    /// Only failures that say something about upstream health (no response,
    /// 5xx) count against the breaker; a 4xx means the upstream answered.
    pub fn record<T>(self, result: &Result<T>) {
        match result {
            Ok(_) => self.succeed(),
            // Says nothing about the upstream either way
            Err(e) if e.is_cancelled() || matches!(e, TetherError::Auth(_)) => drop(self),
            Err(e) if e.is_retryable() => self.fail(),
            Err(_) => self.succeed(),
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

/// Statistics about a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub target: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_rejections: u64,
}

/// One breaker per upstream target, created on first use.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    clock: DynClock,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: DynClock) -> Self {
        Self {
            config,
            clock,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the breaker for a target.
    pub fn breaker_for(&self, target: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cb) = breakers.get(target) {
                return Arc::clone(cb);
            }
        }

        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        let cb = breakers.entry(target.to_string()).or_insert_with(|| {
            debug!("Creating circuit breaker for target: {}", target);
            Arc::new(CircuitBreaker::with_config(
                target,
                self.config.clone(),
                Arc::clone(&self.clock),
            ))
        });
        Arc::clone(cb)
    }

    /// Breaker for the target a URL points at.
    pub fn breaker_for_url(&self, url: &str) -> Arc<CircuitBreaker> {
        self.breaker_for(&target_of(url))
    }

    /// Stats for every known target, sorted by target.
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        let mut stats: Vec<_> = breakers.values().map(|cb| cb.stats()).collect();
        stats.sort_by(|a, b| a.target.cmp(&b.target));
        stats
    }
}

/// Breaker key for a URL: host plus explicit port.
pub fn target_of(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(u) => match (u.host_str(), u.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => "unknown".to_string(),
        },
        Err(_) => "unknown".to_string(),
    }
}
