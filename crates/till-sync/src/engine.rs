//! # Sync Engine
//!
//! Delivers queued operations to the backend and keeps each offline sale
//! record in step with its operation.
//!
//! ## Drain Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           drain(force)                                  │
//! │                                                                         │
//! │  already draining? ──yes──► set rerun flag, return (coalesced)          │
//! │        │ no                                                             │
//! │        ▼                                                                │
//! │  ┌──► fetch `batch_size` queued ops (priority DESC, created_at ASC)     │
//! │  │     │                                                                │
//! │  │     ▼  for each op, in order:                                        │
//! │  │   not due (and not forced) ─────────────► stop pass (no reorder)     │
//! │  │   deliver ──► ok ─────────────► record synced, op removed           │
//! │  │           ├─► rejected ───────► record failed (terminal), op        │
//! │  │           │                     exhausted, continue                 │
//! │  │           └─► network error ──► retry_count+1                        │
//! │  │                                 < max: schedule backoff, stop pass  │
//! │  │                                 = max: exhaust, continue            │
//! │  │     │                                                                │
//! │  └─── batch was full, or a drain was requested meanwhile               │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  purge synced records past retention                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Triggers
//! - `BecameOnline` from the connectivity monitor
//! - a periodic tick while online
//! - `force_sync()` from the operator (ignores the backoff schedule)
//!
//! ## Delivery Guarantees
//! Sales carry `client_sale_id` as their idempotency key, other operations
//! their `op.id`, so redelivering after a lost response is harmless.
//! Events are at-least-once; consumers must tolerate repeats.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use till_core::{OfflineSaleRecord, OfflineSaleStatus, SaleEvent, SyncOperation};
use till_db::{Database, DbError};

use crate::config::SyncSettings;
use crate::connectivity::{ConnectionQuality, ConnectivityEvent, ConnectivityMonitor};
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::notifications::{NotificationCenter, NotificationKind};
use crate::ports::{EventSink, SaleService};

// =============================================================================
// Events & Reports
// =============================================================================

/// Progress of the sync engine, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A drain began with `queued` operations waiting.
    SyncStarted { queued: i64 },

    /// One operation reached the server.
    OperationSynced {
        op_id: String,
        entity: String,
        entity_id: String,
    },

    /// A drain finished.
    SyncCompleted { synced: usize, remaining: i64 },

    /// At least one operation was given up on during the drain.
    SyncFailed { exhausted: Vec<String> },

    /// The drain stopped early and will resume on the next trigger.
    SyncDeferred { remaining: i64, reason: String },
}

/// Outcome of one `drain` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub synced: usize,
    /// Entity ids of operations given up on.
    pub exhausted: Vec<String>,
    /// Why the drain stopped before the queue was empty, if it did.
    pub deferred: Option<String>,
    /// Another drain was running; this call only asked it to go again.
    pub coalesced: bool,
}

/// Point-in-time view of the pipeline's sync side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub online: bool,
    pub quality: ConnectionQuality,
    pub queue_size: i64,
    pub exhausted: i64,
    pub needs_attention: i64,
    pub draining: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct Progress {
    last_sync_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

enum Delivery {
    Delivered,
    Exhausted,
    Retry(String),
    Dropped,
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Drains the sync queue against the sale service.
pub struct SyncEngine {
    db: Arc<Database>,
    sales: Arc<dyn SaleService>,
    sink: Arc<dyn EventSink>,
    connectivity: Arc<ConnectivityMonitor>,
    notifications: Arc<NotificationCenter>,
    settings: SyncSettings,

    draining: AtomicBool,
    rerun: AtomicBool,
    events_tx: broadcast::Sender<SyncEvent>,
    progress: watch::Sender<Progress>,

    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        db: Arc<Database>,
        sales: Arc<dyn SaleService>,
        sink: Arc<dyn EventSink>,
        connectivity: Arc<ConnectivityMonitor>,
        notifications: Arc<NotificationCenter>,
        settings: SyncSettings,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        let (progress, _) = watch::channel(Progress::default());
        let (shutdown_tx, _) = watch::channel(false);

        SyncEngine {
            db,
            sales,
            sink,
            connectivity,
            notifications,
            settings,
            draining: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            events_tx,
            progress,
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Receiver of sync events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Adds an operation to the queue. Enqueuing an id twice keeps one row.
    pub async fn enqueue(&self, op: &SyncOperation) -> SyncResult<String> {
        if !self.db.sync_queue().enqueue(op).await? {
            debug!(op_id = %op.id, "Operation already queued");
        }
        Ok(op.id.clone())
    }

    /// Operations still waiting for delivery.
    pub async fn queue_size(&self) -> SyncResult<i64> {
        Ok(self.db.sync_queue().count_queued().await?)
    }

    pub async fn status(&self) -> SyncResult<SyncStatus> {
        let state = self.connectivity.state();
        let progress = self.progress.borrow().clone();

        Ok(SyncStatus {
            online: state.online,
            quality: state.quality,
            queue_size: self.db.sync_queue().count_queued().await?,
            exhausted: self.db.sync_queue().count_exhausted().await?,
            needs_attention: self.db.offline_sales().count_needing_attention().await?,
            draining: self.draining.load(Ordering::SeqCst),
            last_sync_at: progress.last_sync_at,
            last_error: progress.last_error,
        })
    }

    // =========================================================================
    // Operator Actions
    // =========================================================================

    /// Drains now, ignoring the backoff schedule.
    pub async fn force_sync(&self) -> SyncResult<DrainReport> {
        if *self.shutdown_tx.borrow() {
            return Err(SyncError::ShuttingDown);
        }
        if !self.connectivity.is_online() {
            return Err(SyncError::NetworkUnavailable("terminal is offline".into()));
        }
        info!("Operator requested sync");
        self.drain(true).await
    }

    /// Re-queues an offline sale that ran out of retries.
    pub async fn retry_failed_sale(&self, record_id: &str) -> SyncResult<OfflineSaleRecord> {
        Ok(self.db.requeue_failed_sale(record_id).await?)
    }

    /// Deletes a synced or terminally failed offline sale.
    pub async fn purge_offline_sale(&self, record_id: &str) -> SyncResult<()> {
        Ok(self.db.purge_offline_sale(record_id).await?)
    }

    // =========================================================================
    // Drain
    // =========================================================================

    /// Delivers queued operations until the queue is empty or a pass has to
    /// stop. Concurrent calls coalesce into the running drain.
    pub async fn drain(&self, force: bool) -> SyncResult<DrainReport> {
        let mut total = DrainReport::default();

        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                self.rerun.store(true, Ordering::SeqCst);
                debug!("Drain already running, coalescing");
                total.coalesced = true;
                return Ok(total);
            }

            let result = self.drain_passes(force).await;
            self.draining.store(false, Ordering::SeqCst);

            let report = match result {
                Ok(report) => report,
                Err(e) => {
                    error!(error = %e, "Drain aborted");
                    self.progress
                        .send_modify(|p| p.last_error = Some(e.to_string()));
                    return Err(e);
                }
            };

            let stopped = report.deferred.is_some();
            total.synced += report.synced;
            total.exhausted.extend(report.exhausted);
            total.deferred = report.deferred;

            // A request that arrived between the last pass and releasing
            // the flag would otherwise be lost.
            if stopped || !self.rerun.swap(false, Ordering::SeqCst) {
                return Ok(total);
            }
        }
    }

    async fn drain_passes(&self, force: bool) -> SyncResult<DrainReport> {
        self.rerun.store(false, Ordering::SeqCst);
        let mut report = DrainReport::default();

        let queued = self.db.sync_queue().count_queued().await?;
        if queued == 0 {
            return Ok(report);
        }

        if !self.connectivity.is_online() {
            let reason = "offline".to_string();
            let _ = self.events_tx.send(SyncEvent::SyncDeferred {
                remaining: queued,
                reason: reason.clone(),
            });
            report.deferred = Some(reason);
            return Ok(report);
        }

        info!(queued, force, "Sync drain started");
        let _ = self.events_tx.send(SyncEvent::SyncStarted { queued });

        let mut attempted = HashSet::new();
        loop {
            let full_batch = self.pass(force, &mut attempted, &mut report).await?;
            if report.deferred.is_some() {
                break;
            }
            let requested = self.rerun.swap(false, Ordering::SeqCst);
            if !full_batch && !requested {
                break;
            }
        }

        let remaining = self.db.sync_queue().count_queued().await?;
        self.finish(&report, remaining).await;
        Ok(report)
    }

    /// One batch. Returns whether the batch was full.
    async fn pass(
        &self,
        force: bool,
        attempted: &mut HashSet<String>,
        report: &mut DrainReport,
    ) -> SyncResult<bool> {
        let ops = self.db.sync_queue().queued(self.settings.batch_size).await?;
        let now = Utc::now();

        for op in &ops {
            if attempted.contains(&op.id) {
                report.deferred = Some(format!("operation {} already attempted", op.id));
                return Ok(false);
            }
            if !force && !op.is_due(now) {
                let at = op.next_attempt_at.map(|t| t.to_rfc3339()).unwrap_or_default();
                debug!(op_id = %op.id, next_attempt_at = %at, "Head of queue not due yet");
                report.deferred = Some(format!("next attempt at {at}"));
                return Ok(false);
            }
            attempted.insert(op.id.clone());

            match self.deliver(op).await? {
                Delivery::Delivered => report.synced += 1,
                Delivery::Exhausted => report.exhausted.push(op.entity_id.clone()),
                Delivery::Dropped => {}
                Delivery::Retry(reason) => {
                    report.deferred = Some(reason);
                    return Ok(false);
                }
            }
        }

        Ok(ops.len() as i64 >= self.settings.batch_size)
    }

    async fn finish(&self, report: &DrainReport, remaining: i64) {
        if !report.exhausted.is_empty() {
            let _ = self.events_tx.send(SyncEvent::SyncFailed {
                exhausted: report.exhausted.clone(),
            });
        }
        if let Some(reason) = &report.deferred {
            let _ = self.events_tx.send(SyncEvent::SyncDeferred {
                remaining,
                reason: reason.clone(),
            });
        }
        // Completed means every item this drain reached was delivered.
        if report.exhausted.is_empty() && report.deferred.is_none() {
            let _ = self.events_tx.send(SyncEvent::SyncCompleted {
                synced: report.synced,
                remaining,
            });
        }

        self.progress.send_modify(|p| {
            if report.synced > 0 {
                p.last_sync_at = Some(Utc::now());
            }
            p.last_error = report.deferred.clone();
        });

        info!(
            synced = report.synced,
            exhausted = report.exhausted.len(),
            remaining,
            "Sync drain finished"
        );

        self.purge_expired().await;
    }

    async fn purge_expired(&self) {
        let cutoff = Utc::now() - chrono::Duration::days(self.settings.retention_days);
        match self.db.offline_sales().purge_synced_before(cutoff).await {
            Ok(0) => {}
            Ok(n) => debug!(purged = n, "Purged synced offline sales"),
            Err(e) => warn!(error = %e, "Failed to purge synced offline sales"),
        }
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    async fn deliver(&self, op: &SyncOperation) -> SyncResult<Delivery> {
        if op.is_sale_creation() {
            self.deliver_sale(op).await
        } else {
            self.deliver_operation(op).await
        }
    }

    async fn deliver_sale(&self, op: &SyncOperation) -> SyncResult<Delivery> {
        let record_id = op.entity_id.as_str();

        match self.db.offline_sales().mark_syncing(record_id).await {
            Ok(()) => {}
            Err(DbError::NotFound { .. }) => {
                warn!(op_id = %op.id, sale_id = %record_id, "Queued sale has no record, dropping");
                self.db.sync_queue().remove(&op.id).await?;
                return Ok(Delivery::Dropped);
            }
            // Only one drain runs at a time, so a record already in
            // `syncing` was claimed by a drain that failed before settling
            // it. Delivery is idempotent by client_sale_id; take it over.
            Err(DbError::InvalidTransition { from, .. })
                if from == OfflineSaleStatus::Syncing.as_str() =>
            {
                warn!(sale_id = %record_id, "Resuming offline sale left in syncing");
            }
            Err(e) => return Err(e.into()),
        }

        let payload = match op.sale_payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.exhaust_sale(op, op.retry_count, &format!("unreadable payload: {e}"))
                    .await?;
                return Ok(Delivery::Exhausted);
            }
        };

        match self.sales.create_sale(&payload).await {
            Ok(receipt) => {
                self.connectivity.report_online();
                self.db
                    .confirm_sale_sync(&op.id, record_id, &receipt.sale_id, Utc::now())
                    .await?;

                self.sink.publish(SaleEvent {
                    client_sale_id: payload.client_sale_id.clone(),
                    server_sale_id: receipt.sale_id.clone(),
                    total_cents: payload.total_cents,
                    was_offline: true,
                    occurred_at: Utc::now(),
                });
                self.synced(op);

                info!(sale_id = %record_id, server_sale_id = %receipt.sale_id, "Offline sale synced");
                Ok(Delivery::Delivered)
            }
            Err(RemoteError::Rejected { reason, .. }) => {
                self.exhaust_sale(op, op.retry_count + 1, &format!("rejected: {reason}"))
                    .await?;
                Ok(Delivery::Exhausted)
            }
            Err(RemoteError::Network(reason)) => {
                self.connectivity.report_offline();
                let attempts = op.retry_count + 1;

                if attempts >= self.settings.max_retries {
                    self.exhaust_sale(op, attempts, &reason).await?;
                    return Ok(Delivery::Exhausted);
                }

                let next_attempt_at = self.next_attempt_at(attempts);
                self.db
                    .record_sale_retry(&op.id, record_id, attempts, &reason, next_attempt_at)
                    .await?;

                warn!(
                    sale_id = %record_id,
                    attempts,
                    max_retries = self.settings.max_retries,
                    next_attempt_at = %next_attempt_at,
                    error = %reason,
                    "Offline sale sync failed, will retry"
                );
                Ok(Delivery::Retry(reason))
            }
        }
    }

    async fn deliver_operation(&self, op: &SyncOperation) -> SyncResult<Delivery> {
        match self.sales.apply_operation(op).await {
            Ok(()) => {
                self.connectivity.report_online();
                self.db.sync_queue().remove(&op.id).await?;
                self.synced(op);
                Ok(Delivery::Delivered)
            }
            Err(RemoteError::Rejected { reason, .. }) => {
                self.db
                    .sync_queue()
                    .mark_exhausted(&op.id, op.retry_count + 1, &reason)
                    .await?;
                error!(op_id = %op.id, entity = %op.entity, error = %reason, "Operation rejected");
                Ok(Delivery::Exhausted)
            }
            Err(RemoteError::Network(reason)) => {
                self.connectivity.report_offline();
                let attempts = op.retry_count + 1;

                if attempts >= self.settings.max_retries {
                    self.db
                        .sync_queue()
                        .mark_exhausted(&op.id, attempts, &reason)
                        .await?;
                    error!(op_id = %op.id, entity = %op.entity, attempts, "Operation exhausted");
                    return Ok(Delivery::Exhausted);
                }

                self.db
                    .sync_queue()
                    .record_failure(&op.id, attempts, &reason, self.next_attempt_at(attempts))
                    .await?;
                Ok(Delivery::Retry(reason))
            }
        }
    }

    async fn exhaust_sale(&self, op: &SyncOperation, attempts: i64, reason: &str) -> SyncResult<()> {
        self.db
            .exhaust_sale_sync(&op.id, &op.entity_id, attempts, reason)
            .await?;

        error!(sale_id = %op.entity_id, attempts, error = %reason, "Offline sale needs attention");
        let err = SyncError::SyncExhausted {
            op_id: op.id.clone(),
            attempts,
            last_error: reason.to_string(),
        };
        self.notifications.push(
            NotificationKind::SyncExhausted,
            err.to_string(),
            Some(op.entity_id.clone()),
        );
        Ok(())
    }

    fn synced(&self, op: &SyncOperation) {
        let _ = self.events_tx.send(SyncEvent::OperationSynced {
            op_id: op.id.clone(),
            entity: op.entity.clone(),
            entity_id: op.entity_id.clone(),
        });
    }

    fn next_attempt_at(&self, attempts: i64) -> DateTime<Utc> {
        let delay = retry_delay(&self.settings, attempts);
        Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Recovers interrupted syncs and starts the background drain loop.
    pub async fn start(self: &Arc<Self>) -> SyncResult<()> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Ok(());
        }

        let recovered = self.db.offline_sales().recover_interrupted().await?;
        if recovered > 0 {
            info!(recovered, "Recovered offline sales interrupted mid-sync");
        }

        self.shutdown_tx.send_replace(false);
        let engine = self.clone();
        *task = Some(tokio::spawn(async move { engine.run().await }));

        info!(
            interval_secs = self.settings.interval_secs,
            max_retries = self.settings.max_retries,
            "Sync engine started"
        );
        Ok(())
    }

    /// Stops the background loop, letting a running drain finish.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        info!("Sync engine stopped");
    }

    async fn run(self: Arc<Self>) {
        let mut connectivity = self.connectivity.subscribe();
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut interval = tokio::time::interval(self.settings.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.connectivity.is_online() {
                        self.drain_logged("interval").await;
                    }
                }

                event = connectivity.recv() => match event {
                    Ok(ConnectivityEvent::BecameOnline) => self.drain_logged("reconnect").await,
                    Ok(ConnectivityEvent::BecameOffline) => debug!("Offline, drains paused"),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Missed connectivity events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },

                _ = shutdown.changed() => break,
            }
        }

        debug!("Sync loop stopped");
    }

    async fn drain_logged(&self, trigger: &str) {
        if let Err(e) = self.drain(false).await {
            error!(trigger, error = %e, "Background drain failed");
        }
    }
}

/// Delay before attempt `attempts + 1`: doubles from the initial backoff,
/// capped at the maximum.
pub fn retry_delay(settings: &SyncSettings, attempts: i64) -> Duration {
    let mut schedule = ExponentialBackoff {
        current_interval: settings.initial_backoff(),
        initial_interval: settings.initial_backoff(),
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_interval: settings.max_backoff(),
        max_elapsed_time: None,
        ..Default::default()
    };

    let mut delay = settings.initial_backoff();
    for _ in 0..attempts.max(1) {
        delay = schedule.next_backoff().unwrap_or_else(|| settings.max_backoff());
    }
    delay
}
