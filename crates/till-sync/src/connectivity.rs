//! # Connectivity Monitor
//!
//! Tracks whether the backend is reachable and announces settled changes.
//!
//! ## Observation vs. State
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  probe ok / failed ────┐                                                │
//! │  report_online() ──────┼──► raw observation (watch<bool>)              │
//! │  report_offline() ─────┘          │                                     │
//! │                                   ▼                                     │
//! │                         debounce task: the new value must hold for      │
//! │                         `debounce` with no flip before it settles       │
//! │                                   │                                     │
//! │                                   ▼                                     │
//! │                settled state (watch<ConnectivityState>)                 │
//! │                + BecameOnline / BecameOffline (broadcast)               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A link that flaps faster than the debounce window produces no event; a
//! settled change produces exactly one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ConnectivitySettings;
use crate::error::RemoteError;
use crate::ports::ConnectivityProbe;

// =============================================================================
// State & Events
// =============================================================================

/// Coarse link quality derived from probe latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Good,
    Degraded,
    Offline,
}

/// Settled connectivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityState {
    pub online: bool,
    pub quality: ConnectionQuality,
    /// When `online` last changed.
    pub since: DateTime<Utc>,
    pub last_latency: Option<Duration>,
}

/// Settled transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    BecameOnline,
    BecameOffline,
}

// =============================================================================
// Monitor
// =============================================================================

struct Inner {
    settings: ConnectivitySettings,
    raw_tx: watch::Sender<bool>,
    state_tx: watch::Sender<ConnectivityState>,
    events_tx: broadcast::Sender<ConnectivityEvent>,
    shutdown_tx: watch::Sender<bool>,
}

/// Online/offline tracker with a start/shutdown lifecycle.
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor in the given initial state. Nothing runs until
    /// [`start`](Self::start).
    pub fn new(settings: ConnectivitySettings, initially_online: bool) -> Self {
        let (raw_tx, _) = watch::channel(initially_online);
        let (state_tx, _) = watch::channel(ConnectivityState {
            online: initially_online,
            quality: if initially_online {
                ConnectionQuality::Good
            } else {
                ConnectionQuality::Offline
            },
            since: Utc::now(),
            last_latency: None,
        });
        let (events_tx, _) = broadcast::channel(16);
        let (shutdown_tx, _) = watch::channel(false);

        ConnectivityMonitor {
            inner: Arc::new(Inner {
                settings,
                raw_tx,
                state_tx,
                events_tx,
                shutdown_tx,
            }),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn is_online(&self) -> bool {
        self.inner.state_tx.borrow().online
    }

    pub fn quality(&self) -> ConnectionQuality {
        self.inner.state_tx.borrow().quality
    }

    pub fn state(&self) -> ConnectivityState {
        self.inner.state_tx.borrow().clone()
    }

    /// Receiver of the settled state.
    pub fn watch(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.state_tx.subscribe()
    }

    /// Receiver of settled transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.inner.events_tx.subscribe()
    }

    // =========================================================================
    // Observations
    // =========================================================================

    /// Records that the backend answered.
    pub fn report_online(&self) {
        self.inner.observe(true);
    }

    /// Records that the backend could not be reached.
    pub fn report_offline(&self) {
        self.inner.observe(false);
    }

    /// Records the outcome of a health probe.
    pub fn record_probe(&self, result: Result<Duration, RemoteError>) {
        self.inner.record_probe(result);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts the debounce task. Calling it twice has no effect; after
    /// `shutdown` the monitor can be started again.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown_tx.send_replace(false);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run_debounce().await });
        self.tasks.lock().await.push(handle);

        info!(
            online = self.is_online(),
            debounce_ms = self.inner.settings.debounce_ms,
            "Connectivity monitor started"
        );
    }

    /// Starts probing `probe` on the configured interval.
    pub async fn spawn_probe(&self, probe: Arc<dyn ConnectivityProbe>) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run_probe(probe).await });
        self.tasks.lock().await.push(handle);
    }

    /// Stops every background task of the monitor.
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        self.started.store(false, Ordering::SeqCst);
        info!("Connectivity monitor stopped");
    }
}

impl Inner {
    fn observe(&self, reachable: bool) {
        let changed = self.raw_tx.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });
        if changed {
            debug!(reachable, "Connectivity observation changed");
        }
    }

    fn record_probe(&self, result: Result<Duration, RemoteError>) {
        match result {
            Ok(latency) => {
                let quality = self.quality_for(latency);
                self.state_tx.send_if_modified(|state| {
                    let before = (state.quality, state.last_latency);
                    state.last_latency = Some(latency);
                    if state.online {
                        state.quality = quality;
                    }
                    before != (state.quality, state.last_latency)
                });
                self.observe(true);
            }
            Err(e) => {
                debug!(error = %e, "Health probe failed");
                self.observe(false);
            }
        }
    }

    fn quality_for(&self, latency: Duration) -> ConnectionQuality {
        if latency > self.settings.degraded_latency() {
            ConnectionQuality::Degraded
        } else {
            ConnectionQuality::Good
        }
    }

    fn settle(&self, online: bool) {
        self.state_tx.send_modify(|state| {
            state.online = online;
            state.since = Utc::now();
            state.quality = match (online, state.last_latency) {
                (false, _) => ConnectionQuality::Offline,
                (true, Some(latency)) => self.quality_for(latency),
                (true, None) => ConnectionQuality::Good,
            };
        });

        let event = if online {
            ConnectivityEvent::BecameOnline
        } else {
            ConnectivityEvent::BecameOffline
        };
        info!(?event, "Connectivity changed");
        let _ = self.events_tx.send(event);
    }

    async fn run_debounce(self: Arc<Self>) {
        let mut raw = self.raw_tx.subscribe();
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            let candidate = *raw.borrow_and_update();
            let settled = self.state_tx.borrow().online;

            if candidate != settled {
                // The candidate must hold for a full window.
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.debounce()) => self.settle(candidate),
                    changed = raw.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
                continue;
            }

            tokio::select! {
                changed = raw.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!("Connectivity debounce task stopped");
    }

    async fn run_probe(self: Arc<Self>, probe: Arc<dyn ConnectivityProbe>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut interval = tokio::time::interval(self.settings.probe_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let result = probe.probe().await;
                    self.record_probe(result);
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!("Connectivity probe task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::time::sleep;

    fn settings() -> ConnectivitySettings {
        ConnectivitySettings {
            probe_interval_secs: 5,
            debounce_ms: 2000,
            degraded_latency_ms: 800,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_change_emits_one_event() {
        let monitor = ConnectivityMonitor::new(settings(), false);
        let mut events = monitor.subscribe();
        monitor.start().await;

        monitor.report_online();
        sleep(Duration::from_millis(1000)).await;
        assert!(!monitor.is_online());

        sleep(Duration::from_millis(1500)).await;
        assert!(monitor.is_online());
        assert_eq!(monitor.quality(), ConnectionQuality::Good);
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::BecameOnline);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_flapping_link_is_suppressed() {
        let monitor = ConnectivityMonitor::new(settings(), true);
        let mut events = monitor.subscribe();
        monitor.start().await;

        for _ in 0..5 {
            monitor.report_offline();
            sleep(Duration::from_millis(500)).await;
            monitor.report_online();
            sleep(Duration::from_millis(500)).await;
        }
        sleep(Duration::from_secs(5)).await;

        assert!(monitor.is_online());
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        monitor.report_offline();
        sleep(Duration::from_secs(3)).await;
        assert!(!monitor.is_online());
        assert_eq!(monitor.quality(), ConnectionQuality::Offline);
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::BecameOffline);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_latency_sets_quality() {
        let monitor = ConnectivityMonitor::new(settings(), true);
        monitor.start().await;

        monitor.record_probe(Ok(Duration::from_millis(1500)));
        assert_eq!(monitor.quality(), ConnectionQuality::Degraded);

        monitor.record_probe(Ok(Duration::from_millis(40)));
        assert_eq!(monitor.quality(), ConnectionQuality::Good);
        assert_eq!(monitor.state().last_latency, Some(Duration::from_millis(40)));

        monitor.record_probe(Err(RemoteError::Network("refused".into())));
        sleep(Duration::from_secs(3)).await;
        assert!(!monitor.is_online());

        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_shutdown() {
        let monitor = ConnectivityMonitor::new(settings(), false);
        monitor.start().await;
        monitor.shutdown().await;

        let mut events = monitor.subscribe();
        monitor.start().await;
        monitor.report_online();
        sleep(Duration::from_millis(2500)).await;

        assert!(monitor.is_online());
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::BecameOnline);

        monitor.shutdown().await;
    }

    struct DownProbe;

    #[async_trait::async_trait]
    impl ConnectivityProbe for DownProbe {
        async fn probe(&self) -> Result<Duration, RemoteError> {
            Err(RemoteError::Network("connection refused".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_task_drives_state() {
        let monitor = ConnectivityMonitor::new(settings(), true);
        let mut events = monitor.subscribe();
        monitor.start().await;
        monitor.spawn_probe(Arc::new(DownProbe)).await;

        sleep(Duration::from_secs(3)).await;
        assert!(!monitor.is_online());
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::BecameOffline);

        monitor.shutdown().await;
    }
}
