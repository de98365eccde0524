//! NetworkMonitor - connectivity and link quality tracking.
//!
//! Provides:
//! - A synchronously readable snapshot of connectivity and link quality
//! - Adaptive timeout and data mode recommendations
//! - Transition notifications to subscribed listeners
//! - Optional background probing of configured endpoints

use crate::config::NetworkConfig;
use crate::error::{Result, TetherError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Coarse link quality classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkQuality {
    Excellent,
    Good,
    Fair,
    Poor,
    Offline,
}

impl std::fmt::Display for LinkQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkQuality::Excellent => write!(f, "excellent"),
            LinkQuality::Good => write!(f, "good"),
            LinkQuality::Fair => write!(f, "fair"),
            LinkQuality::Poor => write!(f, "poor"),
            LinkQuality::Offline => write!(f, "offline"),
        }
    }
}

impl LinkQuality {
    /// Classify a set of link hints.
    ///
    /// The effective connection type wins when it names a cellular
    /// generation; otherwise RTT and downlink decide. With no hints at all
    /// an online link is assumed `Good`.
    pub fn assess(hints: &LinkHints) -> Self {
        if !hints.online {
            return LinkQuality::Offline;
        }

        match hints.effective_type.as_deref() {
            Some("slow-2g") | Some("2g") => return LinkQuality::Poor,
            Some("3g") => return LinkQuality::Fair,
            _ => {}
        }

        let rtt = hints.rtt_ms;
        let downlink = hints.downlink_mbps;

        if rtt.is_some_and(|r| r > 1000) || downlink.is_some_and(|d| d < 0.5) {
            return LinkQuality::Poor;
        }
        if rtt.is_some_and(|r| r > 400) || downlink.is_some_and(|d| d < 1.5) {
            return LinkQuality::Fair;
        }
        if rtt.is_some_and(|r| r < 100) && downlink.is_some_and(|d| d >= 10.0) {
            return LinkQuality::Excellent;
        }
        LinkQuality::Good
    }

    /// Request timeout suited to this quality.
    pub fn timeout(self) -> Duration {
        match self {
            LinkQuality::Excellent => NetworkConfig::TIMEOUT_EXCELLENT,
            LinkQuality::Good => NetworkConfig::TIMEOUT_GOOD,
            LinkQuality::Fair => NetworkConfig::TIMEOUT_FAIR,
            LinkQuality::Poor => NetworkConfig::TIMEOUT_POOR,
            LinkQuality::Offline => NetworkConfig::TIMEOUT_OFFLINE,
        }
    }
}

/// How much data the application should fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMode {
    Low,
    Medium,
    High,
}

/// Raw connectivity information pushed by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkHints {
    pub online: bool,
    /// Effective connection type, e.g. `"4g"`, `"3g"`, `"slow-2g"`.
    pub effective_type: Option<String>,
    pub downlink_mbps: Option<f64>,
    pub rtt_ms: Option<u32>,
    pub data_saver: bool,
}

impl LinkHints {
    /// Online with no quality information.
    pub fn online() -> Self {
        Self {
            online: true,
            effective_type: None,
            downlink_mbps: None,
            rtt_ms: None,
            data_saver: false,
        }
    }

    pub fn offline() -> Self {
        Self {
            online: false,
            ..Self::online()
        }
    }

    pub fn with_effective_type(mut self, effective_type: impl Into<String>) -> Self {
        self.effective_type = Some(effective_type.into());
        self
    }

    pub fn with_downlink(mut self, mbps: f64) -> Self {
        self.downlink_mbps = Some(mbps);
        self
    }

    pub fn with_rtt(mut self, rtt_ms: u32) -> Self {
        self.rtt_ms = Some(rtt_ms);
        self
    }

    pub fn with_data_saver(mut self, data_saver: bool) -> Self {
        self.data_saver = data_saver;
        self
    }
}

/// Point-in-time view of connectivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub online: bool,
    pub quality: LinkQuality,
    pub effective_type: Option<String>,
    pub downlink_mbps: Option<f64>,
    pub rtt_ms: Option<u32>,
    pub data_saver: bool,
}

impl NetworkSnapshot {
    pub fn from_hints(hints: LinkHints) -> Self {
        let quality = LinkQuality::assess(&hints);
        Self {
            online: hints.online,
            quality,
            effective_type: hints.effective_type,
            downlink_mbps: hints.downlink_mbps,
            rtt_ms: hints.rtt_ms,
            data_saver: hints.data_saver,
        }
    }

    fn is_transition_from(&self, previous: &NetworkSnapshot) -> bool {
        self.online != previous.online || self.quality != previous.quality
    }
}

/// Receives connectivity snapshots.
///
/// Called once with the current snapshot on subscription, then on every
/// transition. Implemented for plain closures.
pub trait NetworkListener: Send + Sync {
    fn on_change(&self, snapshot: &NetworkSnapshot);
}

impl<F> NetworkListener for F
where
    F: Fn(&NetworkSnapshot) + Send + Sync,
{
    fn on_change(&self, snapshot: &NetworkSnapshot) {
        self(snapshot)
    }
}

type ListenerList = Mutex<Vec<(u64, Arc<dyn NetworkListener>)>>;

/// Handle for a registered listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    /// Remove the listener now.
    pub fn unsubscribe(self) {
        drop(self)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            let mut listeners = listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Configuration for connectivity probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    /// URLs to probe for connectivity (in order of preference).
    pub probe_urls: Vec<String>,
    /// Timeout for connectivity probes.
    pub probe_timeout: Duration,
    /// How often to re-check connectivity when offline.
    pub offline_recheck_interval: Duration,
    /// How often to verify connectivity when online.
    pub online_verify_interval: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_urls: Vec::new(),
            probe_timeout: NetworkConfig::PROBE_TIMEOUT,
            offline_recheck_interval: NetworkConfig::OFFLINE_RECHECK_INTERVAL,
            online_verify_interval: NetworkConfig::ONLINE_VERIFY_INTERVAL,
        }
    }
}

/// Active connectivity check.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self) -> LinkHints;
}

/// Probe that sends HEAD requests to configured URLs.
///
/// The first URL that answers marks the link online, with the measured
/// round trip as RTT hint.
pub struct HttpProbe {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl HttpProbe {
    pub fn new(config: &ConnectivityConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| TetherError::Network {
                message: format!("Failed to create probe client: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            client,
            urls: config.probe_urls.clone(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn probe(&self) -> LinkHints {
        for url in &self.urls {
            let started = Instant::now();
            match self.client.head(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    // Any answer proves the link works, even a refusal
                    if status.is_success() || status.is_redirection() || status.is_client_error()
                    {
                        let rtt = started.elapsed().as_millis().min(u32::MAX as u128) as u32;
                        return LinkHints::online().with_rtt(rtt);
                    }
                    debug!("Probe {} answered {}", url, status);
                }
                Err(e) => {
                    debug!("Probe request to {} failed: {}", url, e);
                }
            }
        }
        LinkHints::offline()
    }
}

/// Tracks connectivity and notifies listeners about transitions.
pub struct NetworkMonitor {
    config: ConnectivityConfig,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    snapshot: RwLock<NetworkSnapshot>,
    listeners: Arc<ListenerList>,
    next_listener_id: AtomicU64,
    monitoring_active: AtomicBool,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(ConnectivityConfig::default())
    }
}

impl NetworkMonitor {
    /// Create a monitor that assumes an online link until told otherwise.
    pub fn new(config: ConnectivityConfig) -> Self {
        Self {
            config,
            probe: None,
            snapshot: RwLock::new(NetworkSnapshot::from_hints(LinkHints::online())),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
            monitoring_active: AtomicBool::new(false),
            monitor_task: Mutex::new(None),
        }
    }

    /// Create a monitor that probes the configured URLs over HTTP.
    ///
    /// Without probe URLs the monitor relies on [`report`](Self::report) alone.
    pub fn with_http_probe(config: ConnectivityConfig) -> Result<Self> {
        if config.probe_urls.is_empty() {
            return Ok(Self::new(config));
        }
        let probe = HttpProbe::new(&config)?;
        Ok(Self::new(config).with_probe(Arc::new(probe)))
    }

    pub fn with_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    // === Snapshot ===

    pub fn current_snapshot(&self) -> NetworkSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_online(&self) -> bool {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner()).online
    }

    pub fn recommended_timeout(&self) -> Duration {
        self.current_snapshot().quality.timeout()
    }

    pub fn recommended_data_mode(&self) -> DataMode {
        let snapshot = self.current_snapshot();
        if snapshot.data_saver {
            return DataMode::Low;
        }
        match snapshot.quality {
            LinkQuality::Poor | LinkQuality::Offline => DataMode::Low,
            LinkQuality::Fair => DataMode::Medium,
            LinkQuality::Excellent | LinkQuality::Good => DataMode::High,
        }
    }

    /// Publish new link hints.
    ///
    /// Listeners are notified only when the online flag or the quality
    /// changes. Returns the resulting snapshot.
    pub fn report(&self, hints: LinkHints) -> NetworkSnapshot {
        let next = NetworkSnapshot::from_hints(hints);

        let previous = {
            let mut current = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, next.clone())
        };

        if next.is_transition_from(&previous) {
            match (previous.online, next.online) {
                (false, true) => info!("Network connectivity restored ({})", next.quality),
                (true, false) => warn!("Network connectivity lost"),
                _ => debug!("Link quality changed: {} -> {}", previous.quality, next.quality),
            }
            self.notify(&next);
        }

        next
    }

    // === Listeners ===

    /// Register a listener. It is called immediately with the current
    /// snapshot.
    pub fn subscribe<L>(&self, listener: L) -> Subscription
    where
        L: NetworkListener + 'static,
    {
        let listener: Arc<dyn NetworkListener> = Arc::new(listener);
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);

        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::clone(&listener)));

        Self::deliver(id, listener.as_ref(), &self.current_snapshot());

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn notify(&self, snapshot: &NetworkSnapshot) {
        // Call outside the lock so listeners may (un)subscribe
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for (id, listener) in listeners {
            Self::deliver(id, listener.as_ref(), snapshot);
        }
    }

    fn deliver(id: u64, listener: &dyn NetworkListener, snapshot: &NetworkSnapshot) {
        if catch_unwind(AssertUnwindSafe(|| listener.on_change(snapshot))).is_err() {
            warn!("Network listener {} panicked; continuing with others", id);
        }
    }

    // === Probing ===

    /// Run the probe once and publish its result.
    ///
    /// Without a probe this returns the current snapshot unchanged.
    pub async fn confirm(&self) -> NetworkSnapshot {
        match &self.probe {
            Some(probe) => {
                let hints = probe.probe().await;
                self.report(hints)
            }
            None => self.current_snapshot(),
        }
    }

    /// Start background connectivity monitoring.
    ///
    /// Spawns a task that re-runs the probe every `online_verify_interval`
    /// while online and every `offline_recheck_interval` while offline.
    pub fn start(self: &Arc<Self>) {
        if self.probe.is_none() {
            debug!("No connectivity probe configured, background monitoring disabled");
            return;
        }
        if self.monitoring_active.swap(true, Ordering::SeqCst) {
            debug!("Background monitoring already active");
            return;
        }

        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("Starting background connectivity monitoring");

            while monitor.monitoring_active.load(Ordering::SeqCst) {
                let interval = if monitor.is_online() {
                    monitor.config.online_verify_interval
                } else {
                    monitor.config.offline_recheck_interval
                };

                tokio::time::sleep(interval).await;

                if !monitor.monitoring_active.load(Ordering::SeqCst) {
                    break;
                }

                debug!("Background connectivity check");
                monitor.confirm().await;
            }

            info!("Background connectivity monitoring stopped");
        });

        *self.monitor_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Stop background monitoring.
    pub fn stop(&self) {
        self.monitoring_active.store(false, Ordering::SeqCst);
        if let Some(handle) = self
            .monitor_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring_active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<NetworkSnapshot>>>, impl NetworkListener) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |s: &NetworkSnapshot| {
            sink.lock().unwrap().push(s.clone())
        })
    }

    #[test]
    fn test_quality_assessment() {
        assert_eq!(LinkQuality::assess(&LinkHints::offline()), LinkQuality::Offline);
        assert_eq!(LinkQuality::assess(&LinkHints::online()), LinkQuality::Good);
        assert_eq!(
            LinkQuality::assess(&LinkHints::online().with_effective_type("2g")),
            LinkQuality::Poor
        );
        assert_eq!(
            LinkQuality::assess(&LinkHints::online().with_effective_type("3g")),
            LinkQuality::Fair
        );
        assert_eq!(
            LinkQuality::assess(&LinkHints::online().with_rtt(1500)),
            LinkQuality::Poor
        );
        assert_eq!(
            LinkQuality::assess(&LinkHints::online().with_downlink(1.0)),
            LinkQuality::Fair
        );
        assert_eq!(
            LinkQuality::assess(&LinkHints::online().with_rtt(50).with_downlink(25.0)),
            LinkQuality::Excellent
        );
        assert_eq!(
            LinkQuality::assess(&LinkHints::online().with_rtt(50)),
            LinkQuality::Good
        );
    }

    #[test]
    fn test_recommended_timeout_follows_quality() {
        let monitor = NetworkMonitor::default();
        assert_eq!(monitor.recommended_timeout(), Duration::from_secs(20));

        monitor.report(LinkHints::online().with_effective_type("slow-2g"));
        assert_eq!(monitor.recommended_timeout(), Duration::from_secs(45));

        monitor.report(LinkHints::offline());
        assert_eq!(monitor.recommended_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_recommended_data_mode() {
        let monitor = NetworkMonitor::default();
        assert_eq!(monitor.recommended_data_mode(), DataMode::High);

        monitor.report(LinkHints::online().with_effective_type("3g"));
        assert_eq!(monitor.recommended_data_mode(), DataMode::Medium);

        monitor.report(LinkHints::online().with_data_saver(true));
        assert_eq!(monitor.recommended_data_mode(), DataMode::Low);
    }

    #[test]
    fn test_subscribe_delivers_current_then_transitions() {
        let monitor = NetworkMonitor::default();
        let (seen, listener) = recorder();
        let _sub = monitor.subscribe(listener);

        // Same online flag and quality: not a transition
        monitor.report(LinkHints::online().with_rtt(150));
        monitor.report(LinkHints::offline());
        monitor.report(LinkHints::online());

        let seen = seen.lock().unwrap();
        let online: Vec<bool> = seen.iter().map(|s| s.online).collect();
        assert_eq!(online, vec![true, false, true]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let monitor = NetworkMonitor::default();
        let (seen, listener) = recorder();
        let sub = monitor.subscribe(listener);
        assert_eq!(monitor.listener_count(), 1);

        sub.unsubscribe();
        assert_eq!(monitor.listener_count(), 0);

        monitor.report(LinkHints::offline());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let monitor = NetworkMonitor::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let _bad = monitor.subscribe(|s: &NetworkSnapshot| {
            if !s.online {
                panic!("listener bug");
            }
        });
        let c = Arc::clone(&calls);
        let _good = monitor.subscribe(move |_: &NetworkSnapshot| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        monitor.report(LinkHints::offline());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    struct FlakyProbe {
        online: AtomicBool,
    }

    #[async_trait]
    impl ConnectivityProbe for FlakyProbe {
        async fn probe(&self) -> LinkHints {
            if self.online.load(Ordering::SeqCst) {
                LinkHints::online()
            } else {
                LinkHints::offline()
            }
        }
    }

    #[tokio::test]
    async fn test_confirm_uses_probe() {
        let probe = Arc::new(FlakyProbe {
            online: AtomicBool::new(false),
        });
        let monitor = NetworkMonitor::default().with_probe(probe.clone());

        assert!(!monitor.confirm().await.online);
        assert!(!monitor.is_online());

        probe.online.store(true, Ordering::SeqCst);
        assert!(monitor.confirm().await.online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_monitoring_detects_recovery() {
        let probe = Arc::new(FlakyProbe {
            online: AtomicBool::new(false),
        });
        let config = ConnectivityConfig {
            offline_recheck_interval: Duration::from_secs(30),
            ..ConnectivityConfig::default()
        };
        let monitor = Arc::new(NetworkMonitor::new(config).with_probe(probe.clone()));
        monitor.report(LinkHints::offline());

        monitor.start();
        assert!(monitor.is_monitoring());

        probe.online.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(monitor.is_online());

        monitor.stop();
        assert!(!monitor.is_monitoring());
    }

    #[test]
    fn test_start_without_probe_is_noop() {
        let monitor = Arc::new(NetworkMonitor::default());
        monitor.start();
        assert!(!monitor.is_monitoring());
    }
}
