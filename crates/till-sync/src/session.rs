//! # POS Session
//!
//! The upward API of the sale pipeline: one session per terminal, owning
//! the cart and the checkout and wiring them to validation, submission and
//! sync.
//!
//! ## Sale Submission
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         process_sale()                                  │
//! │                                                                         │
//! │  checkout at Confirmation ──► cart locked                               │
//! │        │                                                                │
//! │   online?──no────────────────────────────────────────┐                 │
//! │        │ yes                                          │                 │
//! │        ▼                                              │                 │
//! │  live re-validation ──network error──────────────────►│                 │
//! │        │        │                                     │                 │
//! │        │     invalid ──► back to Validation, cart     │                 │
//! │        │                 unlocked, ValidationFailed   │                 │
//! │        ▼                                              │                 │
//! │  SaleService::create_sale ──network error────────────►│                 │
//! │        │        │                                     ▼                 │
//! │        │     rejected ──► SubmissionRejected,    record + queued op     │
//! │        │                  cart intact            (one transaction)      │
//! │        ▼                                              │                 │
//! │  Confirmed: event published                     Queued: pending sync    │
//! │        │                                              │                 │
//! │        └───────────► cart cleared, checkout closed ◄──┘                 │
//! │                                                                         │
//! │  Local store failure ──► PersistenceFailure, cart intact               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The same `client_sale_id` is used when a direct submission falls back to
//! the queue, so a sale the server committed before the connection dropped
//! is deduplicated on redelivery.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use till_core::validation::{normalize_customer_id, normalize_note};
use till_core::{
    AvailabilitySource, Cart, CartLine, CartSummary, CheckoutStateMachine, CheckoutStep,
    CoreError, CoreResult, OfflineSaleRecord, SaleDetails, SaleEvent, SalePayload, SaleReceipt,
    StockValidationResult, SyncOperation,
};
use till_db::Database;

use crate::config::PipelineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::engine::{DrainReport, SyncEngine, SyncEvent, SyncStatus};
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::notifications::{Notification, NotificationCenter, NotificationKind};
use crate::ports::{ConnectivityProbe, EventSink, NoOpSink, SaleService, StockService};
use crate::stock::{CartValidation, StockValidationEngine};

/// How a submitted sale ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaleOutcome {
    /// The server recorded the sale.
    Confirmed {
        client_sale_id: String,
        server_sale_id: String,
    },
    /// Stored locally; the sync engine will deliver it.
    Queued { client_sale_id: String },
}

impl SaleOutcome {
    pub fn client_sale_id(&self) -> &str {
        match self {
            SaleOutcome::Confirmed { client_sale_id, .. } => client_sale_id,
            SaleOutcome::Queued { client_sale_id } => client_sale_id,
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// One terminal's cart, checkout and background services.
pub struct PosSession {
    config: Arc<PipelineConfig>,
    db: Arc<Database>,
    sales: Arc<dyn SaleService>,
    sink: Arc<dyn EventSink>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    connectivity: Arc<ConnectivityMonitor>,
    validator: Arc<StockValidationEngine>,
    engine: Arc<SyncEngine>,
    notifications: Arc<NotificationCenter>,

    cart_tx: watch::Sender<Cart>,
    checkout_tx: watch::Sender<CheckoutStateMachine>,
}

impl PosSession {
    pub fn builder(config: PipelineConfig) -> PosSessionBuilder {
        PosSessionBuilder::new(config)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts connectivity monitoring and the sync engine.
    pub async fn start(&self) -> SyncResult<()> {
        self.connectivity.start().await;
        if let Some(probe) = &self.probe {
            self.connectivity.spawn_probe(probe.clone()).await;
        }
        self.engine.start().await?;

        info!(terminal_id = %self.config.terminal_id(), "POS session started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
        self.connectivity.shutdown().await;
        info!("POS session stopped");
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    // =========================================================================
    // Cart
    // =========================================================================

    /// Adds `line` to the cart, merging with an existing line of the same
    /// product.
    pub fn add_item(&self, line: CartLine) -> SyncResult<()> {
        self.edit_cart(|cart| cart.add_line(line))
    }

    /// Sets a line's quantity. Zero removes the line.
    pub fn update_quantity(&self, product_id: &str, quantity: i64) -> SyncResult<()> {
        self.edit_cart(|cart| cart.update_quantity(product_id, quantity))
    }

    pub fn remove_item(&self, product_id: &str) -> SyncResult<()> {
        self.edit_cart(|cart| cart.remove_line(product_id))
    }

    pub fn clear_cart(&self) -> SyncResult<()> {
        self.edit_cart(Cart::clear)
    }

    fn edit_cart(&self, edit: impl FnOnce(&mut Cart) -> CoreResult<()>) -> SyncResult<()> {
        let mut outcome = Ok(());
        self.cart_tx.send_if_modified(|cart| {
            let before = cart.revision();
            outcome = edit(cart);
            cart.revision() != before
        });
        outcome?;

        self.schedule_validation();
        Ok(())
    }

    /// Debounced validation of the current cart in the background.
    fn schedule_validation(&self) {
        let (lines, revision) = self.cart_snapshot();
        let request = self.validator.request(lines, revision);

        tokio::spawn(async move {
            if let Some(result) = request.await {
                debug!(revision, valid = result.is_valid, "Cart validated");
            }
        });
    }

    fn cart_snapshot(&self) -> (Vec<CartLine>, u64) {
        let cart = self.cart_tx.borrow();
        (cart.lines().to_vec(), cart.revision())
    }

    /// Validates the current cart now, skipping the debounce.
    pub async fn validate_cart_stock(&self) -> StockValidationResult {
        let (lines, revision) = self.cart_snapshot();
        self.validator.validate_now(&lines, revision).await
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    pub fn open_checkout(&self) -> SyncResult<CheckoutStep> {
        let step = self.edit_checkout(CheckoutStateMachine::open)?;
        info!(items = self.summary().item_count, "Checkout opened");
        Ok(step)
    }

    /// Moves the checkout one step forward.
    ///
    /// Online, leaving `Validation` needs a server-confirmed valid result
    /// for the current cart; one is fetched if the latest result is for an
    /// older revision or came from the snapshot cache. Offline, the step is
    /// always allowed.
    pub async fn advance(&self) -> SyncResult<CheckoutStep> {
        let at_validation = self.checkout_step() == Some(CheckoutStep::Validation);
        let mut online = self.connectivity.is_online();

        let validation = if at_validation && online {
            let (lines, revision) = self.cart_snapshot();
            let latest = self
                .validator
                .latest_for(revision)
                .filter(|r| r.source == AvailabilitySource::Live);
            let result = match latest {
                Some(result) => result,
                None => self.validator.validate_now(&lines, revision).await,
            };
            // A cached answer while nominally online means the stock
            // service could not be reached.
            if result.source == AvailabilitySource::Cached {
                online = false;
            }
            Some(result)
        } else {
            None
        };

        let step = self.edit_checkout(|checkout| checkout.advance(online, validation.as_ref()))?;
        debug!(%step, online, "Checkout advanced");
        Ok(step)
    }

    pub fn back(&self) -> SyncResult<CheckoutStep> {
        self.edit_checkout(CheckoutStateMachine::back)
    }

    /// Records the optional customer and note for the sale.
    pub fn set_details(&self, customer_id: Option<String>, note: Option<String>) -> SyncResult<()> {
        let details = SaleDetails {
            customer_id: normalize_customer_id(customer_id).map_err(CoreError::from)?,
            note: normalize_note(note).map_err(CoreError::from)?,
        };
        self.edit_checkout(|checkout| checkout.set_details(details))
    }

    /// Abandons the checkout. The cart is kept.
    pub fn cancel(&self) -> SyncResult<()> {
        self.edit_checkout(CheckoutStateMachine::cancel)?;
        info!("Checkout cancelled");
        Ok(())
    }

    fn edit_checkout<T>(
        &self,
        edit: impl FnOnce(&mut CheckoutStateMachine) -> CoreResult<T>,
    ) -> SyncResult<T> {
        let mut outcome = None;
        self.checkout_tx.send_if_modified(|checkout| {
            let result = edit(checkout);
            let changed = result.is_ok();
            outcome = Some(result);
            changed
        });

        match outcome {
            Some(result) => Ok(result?),
            None => Err(SyncError::Internal("checkout edit did not run".into())),
        }
    }

    fn update_checkout(&self, update: impl FnOnce(&mut CheckoutStateMachine)) {
        self.checkout_tx.send_modify(update);
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Submits the sale at the confirmation step.
    ///
    /// `customer_id` and `note`, when given, replace the details recorded
    /// earlier in the checkout.
    pub async fn process_sale(
        &self,
        customer_id: Option<String>,
        note: Option<String>,
    ) -> SyncResult<SaleOutcome> {
        let customer_id = normalize_customer_id(customer_id).map_err(CoreError::from)?;
        let note = normalize_note(note).map_err(CoreError::from)?;

        let details = self.edit_checkout(CheckoutStateMachine::begin_submit)?;
        if let Err(e) = self.set_cart_lock(true) {
            self.update_checkout(CheckoutStateMachine::abort_submission);
            return Err(e);
        }

        let customer_id = customer_id.or(details.customer_id);
        let note = note.or(details.note);
        let (lines, revision) = self.cart_snapshot();

        if lines.is_empty() {
            return Err(self.reject(StockValidationResult::empty_cart(), revision));
        }

        let payload = SalePayload::from_lines(self.config.terminal_id(), &lines, customer_id, note);

        if self.connectivity.is_online() {
            match self.validator.validate_live(&lines).await {
                Ok(result) if !result.is_valid => return Err(self.reject(result, revision)),
                Ok(result) => {
                    self.validator.publish(result, revision);
                    match self.sales.create_sale(&payload).await {
                        Ok(receipt) => return Ok(self.complete_online(&payload, receipt)),
                        Err(RemoteError::Rejected { reason, .. }) => {
                            return Err(self.abort_rejected(&payload, reason));
                        }
                        Err(RemoteError::Network(reason)) => {
                            self.connectivity.report_offline();
                            warn!(
                                sale_id = %payload.client_sale_id,
                                error = %reason,
                                "Sale submission failed, storing offline"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        sale_id = %payload.client_sale_id,
                        error = %e,
                        "Stock re-validation unavailable, storing offline"
                    );
                }
            }
        }

        self.store_offline(payload).await
    }

    async fn store_offline(&self, payload: SalePayload) -> SyncResult<SaleOutcome> {
        let op = SyncOperation::create_sale(&payload).map_err(|e| self.abort_with(e.into()))?;
        let record = OfflineSaleRecord::pending(&payload, &op.id);

        if let Err(e) = self.db.record_offline_sale(&record, &op).await {
            error!(sale_id = %record.id, error = %e, "Could not store offline sale");
            self.notifications.push(
                NotificationKind::PersistenceFailure,
                format!("Sale could not be saved on this terminal: {e}"),
                Some(record.id.clone()),
            );
            return Err(self.abort_with(e.into()));
        }

        self.finish_sale();
        self.notifications.push(
            NotificationKind::SalePendingSync,
            format!(
                "Sale saved offline ({}), it will be sent when the connection is back",
                record.total()
            ),
            Some(record.id.clone()),
        );

        info!(sale_id = %record.id, total_cents = record.total_cents, "Sale queued for sync");
        Ok(SaleOutcome::Queued {
            client_sale_id: record.id,
        })
    }

    fn complete_online(&self, payload: &SalePayload, receipt: SaleReceipt) -> SaleOutcome {
        self.connectivity.report_online();
        self.sink.publish(SaleEvent {
            client_sale_id: payload.client_sale_id.clone(),
            server_sale_id: receipt.sale_id.clone(),
            total_cents: payload.total_cents,
            was_offline: false,
            occurred_at: Utc::now(),
        });

        self.finish_sale();
        self.notifications.push(
            NotificationKind::SaleConfirmed,
            format!("Sale {} completed", receipt.sale_id),
            Some(payload.client_sale_id.clone()),
        );

        info!(
            sale_id = %payload.client_sale_id,
            server_sale_id = %receipt.sale_id,
            total_cents = payload.total_cents,
            "Sale confirmed"
        );
        SaleOutcome::Confirmed {
            client_sale_id: payload.client_sale_id.clone(),
            server_sale_id: receipt.sale_id,
        }
    }

    fn finish_sale(&self) {
        self.cart_tx.send_modify(Cart::complete_sale);
        self.update_checkout(CheckoutStateMachine::finish_submit);

        let revision = self.cart_tx.borrow().revision();
        self.validator
            .publish(StockValidationResult::empty_cart(), revision);
    }

    /// Final re-validation failed: back to `Validation` with the cart intact.
    fn reject(&self, result: StockValidationResult, revision: u64) -> SyncError {
        info!(
            short = result.insufficient_items.len(),
            "Sale blocked by stock re-validation"
        );
        self.validator.publish(result.clone(), revision);
        self.update_checkout(|checkout| checkout.reject_submission(result.clone()));
        let _ = self.set_cart_lock(false);
        SyncError::ValidationFailed(Box::new(result))
    }

    fn abort_rejected(&self, payload: &SalePayload, reason: String) -> SyncError {
        error!(sale_id = %payload.client_sale_id, error = %reason, "Sale rejected by server");
        self.notifications.push(
            NotificationKind::SaleRejected,
            format!("The server refused the sale: {reason}"),
            Some(payload.client_sale_id.clone()),
        );
        self.abort_with(SyncError::SubmissionRejected(reason))
    }

    /// Nothing was persisted: stay at `Confirmation`, release the cart.
    fn abort_with(&self, err: SyncError) -> SyncError {
        self.update_checkout(CheckoutStateMachine::abort_submission);
        let _ = self.set_cart_lock(false);
        err
    }

    fn set_cart_lock(&self, locked: bool) -> SyncResult<()> {
        let mut outcome = Ok(());
        self.cart_tx.send_if_modified(|cart| {
            if locked {
                outcome = cart.lock();
                outcome.is_ok()
            } else {
                let was_locked = cart.is_locked();
                cart.unlock();
                was_locked
            }
        });
        Ok(outcome?)
    }

    // =========================================================================
    // Sync & Operator Actions
    // =========================================================================

    pub async fn force_sync(&self) -> SyncResult<DrainReport> {
        self.engine.force_sync().await
    }

    pub async fn retry_failed_sale(&self, record_id: &str) -> SyncResult<OfflineSaleRecord> {
        self.engine.retry_failed_sale(record_id).await
    }

    pub async fn purge_offline_sale(&self, record_id: &str) -> SyncResult<()> {
        self.engine.purge_offline_sale(record_id).await
    }

    pub fn dismiss_notification(&self, id: u64) -> bool {
        self.notifications.dismiss(id)
    }

    // =========================================================================
    // Observables
    // =========================================================================

    pub fn cart(&self) -> Cart {
        self.cart_tx.borrow().clone()
    }

    pub fn watch_cart(&self) -> watch::Receiver<Cart> {
        self.cart_tx.subscribe()
    }

    pub fn summary(&self) -> CartSummary {
        self.cart_tx.borrow().summary()
    }

    pub fn checkout_step(&self) -> Option<CheckoutStep> {
        self.checkout_tx.borrow().step()
    }

    pub fn checkout_details(&self) -> SaleDetails {
        self.checkout_tx.borrow().details().clone()
    }

    /// Result of the re-validation that sent the checkout back, if any.
    pub fn checkout_rejection(&self) -> Option<StockValidationResult> {
        self.checkout_tx.borrow().rejection().cloned()
    }

    /// Latest validation result, if it belongs to the current cart.
    pub fn validation_result(&self) -> Option<StockValidationResult> {
        let revision = self.cart_tx.borrow().revision();
        self.validator.latest_for(revision)
    }

    pub fn watch_validation(&self) -> watch::Receiver<Option<CartValidation>> {
        self.validator.watch()
    }

    pub async fn queue_size(&self) -> SyncResult<i64> {
        self.engine.queue_size().await
    }

    /// Every offline sale on this terminal, newest first.
    pub async fn offline_sales(&self) -> SyncResult<Vec<OfflineSaleRecord>> {
        Ok(self.db.offline_sales().list().await?)
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.list()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub async fn sync_status(&self) -> SyncResult<SyncStatus> {
        self.engine.status().await
    }

    pub fn subscribe_sync(&self) -> broadcast::Receiver<SyncEvent> {
        self.engine.subscribe()
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder wiring a session to its collaborators.
pub struct PosSessionBuilder {
    config: PipelineConfig,
    db: Option<Arc<Database>>,
    stock: Option<Arc<dyn StockService>>,
    sales: Option<Arc<dyn SaleService>>,
    sink: Option<Arc<dyn EventSink>>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    initially_online: bool,
}

impl PosSessionBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        PosSessionBuilder {
            config,
            db: None,
            stock: None,
            sales: None,
            sink: None,
            probe: None,
            initially_online: false,
        }
    }

    pub fn with_database(mut self, db: Arc<Database>) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_stock_service(mut self, stock: Arc<dyn StockService>) -> Self {
        self.stock = Some(stock);
        self
    }

    pub fn with_sale_service(mut self, sales: Arc<dyn SaleService>) -> Self {
        self.sales = Some(sales);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Health probe polled by the connectivity monitor once started.
    pub fn with_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Connectivity assumed before the first observation. Defaults to
    /// offline.
    pub fn initially_online(mut self, online: bool) -> Self {
        self.initially_online = online;
        self
    }

    pub fn build(self) -> SyncResult<PosSession> {
        self.config.validate()?;

        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("Database required".into()))?;
        let stock = self
            .stock
            .ok_or_else(|| SyncError::InvalidConfig("Stock service required".into()))?;
        let sales = self
            .sales
            .ok_or_else(|| SyncError::InvalidConfig("Sale service required".into()))?;
        let sink = self.sink.unwrap_or_else(|| Arc::new(NoOpSink));

        let config = Arc::new(self.config);
        let notifications = Arc::new(NotificationCenter::new());
        let connectivity = Arc::new(ConnectivityMonitor::new(
            config.connectivity.clone(),
            self.initially_online,
        ));
        let validator = Arc::new(StockValidationEngine::new(
            db.clone(),
            stock,
            connectivity.clone(),
            config.validation.debounce(),
        ));
        let engine = Arc::new(SyncEngine::new(
            db.clone(),
            sales.clone(),
            sink.clone(),
            connectivity.clone(),
            notifications.clone(),
            config.sync.clone(),
        ));

        let (cart_tx, _) = watch::channel(Cart::new());
        let (checkout_tx, _) = watch::channel(CheckoutStateMachine::new());

        Ok(PosSession {
            config,
            db,
            sales,
            sink,
            probe: self.probe,
            connectivity,
            validator,
            engine,
            notifications,
            cart_tx,
            checkout_tx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::fakes::{FakeSaleService, FakeStockService, RecordingSink};
    use till_core::{InsufficientItem, OfflineSaleStatus};
    use till_db::DbConfig;

    struct Harness {
        db: Arc<Database>,
        stock: Arc<FakeStockService>,
        sales: Arc<FakeSaleService>,
        sink: Arc<RecordingSink>,
        session: Arc<PosSession>,
    }

    async fn harness(online: bool, levels: &[(&str, i64)]) -> Harness {
        let mut config = PipelineConfig::default();
        config.validation.debounce_ms = 20;
        config.connectivity.debounce_ms = 20;
        config.sync.initial_backoff_ms = 0;

        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let stock = Arc::new(FakeStockService::with(levels));
        let sales = Arc::new(FakeSaleService::default());
        let sink = Arc::new(RecordingSink::default());

        let session = PosSession::builder(config)
            .with_database(db.clone())
            .with_stock_service(stock.clone())
            .with_sale_service(sales.clone())
            .with_event_sink(sink.clone())
            .initially_online(online)
            .build()
            .unwrap();

        Harness {
            db,
            stock,
            sales,
            sink,
            session: Arc::new(session),
        }
    }

    fn product_a(qty: i64) -> CartLine {
        CartLine::new("a", "Product A", qty, 250, 5)
    }

    async fn to_confirmation(session: &PosSession) {
        session.open_checkout().unwrap();
        assert_eq!(session.advance().await.unwrap(), CheckoutStep::Details);
        assert_eq!(session.advance().await.unwrap(), CheckoutStep::Confirmation);
    }

    #[tokio::test]
    async fn test_online_sale_is_confirmed() {
        let h = harness(true, &[("a", 5)]).await;
        h.session.add_item(product_a(3)).unwrap();
        to_confirmation(&h.session).await;

        let outcome = h.session.process_sale(None, None).await.unwrap();
        assert!(matches!(outcome, SaleOutcome::Confirmed { .. }));

        assert!(h.session.cart().is_empty());
        assert!(!h.session.cart().is_locked());
        assert_eq!(h.session.checkout_step(), None);
        assert_eq!(h.sales.calls(), 1);
        assert_eq!(h.sales.sale_count(), 1);
        assert!(h.session.offline_sales().await.unwrap().is_empty());
        assert_eq!(h.session.queue_size().await.unwrap(), 0);

        let events = h.sink.events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].was_offline);
        assert_eq!(events[0].total_cents, 750);

        let notes = h.session.notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::SaleConfirmed);
    }

    #[tokio::test]
    async fn test_offline_sale_is_queued() {
        let h = harness(false, &[("a", 5)]).await;
        h.session.add_item(product_a(3)).unwrap();
        to_confirmation(&h.session).await;

        let outcome = h
            .session
            .process_sale(Some(" c-7 ".into()), Some("table 4".into()))
            .await
            .unwrap();
        let SaleOutcome::Queued { client_sale_id } = outcome else {
            panic!("expected a queued sale");
        };

        assert!(h.session.cart().is_empty());
        assert_eq!(h.sales.calls(), 0);

        let records = h.session.offline_sales().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, client_sale_id);
        assert_eq!(records[0].status, OfflineSaleStatus::Pending);
        assert_eq!(records[0].customer_id.as_deref(), Some("c-7"));
        assert_eq!(records[0].total_cents, 750);
        assert_eq!(h.session.queue_size().await.unwrap(), 1);

        let notes = h.session.notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::SalePendingSync);
        assert!(!notes[0].kind.needs_attention());
    }

    #[tokio::test]
    async fn test_insufficient_stock_blocks_checkout() {
        let h = harness(true, &[("b", 2)]).await;
        h.session
            .add_item(CartLine::new("b", "Product B", 10, 100, 2))
            .unwrap();

        let result = h.session.validate_cart_stock().await;
        assert!(!result.is_valid);
        assert_eq!(result.source, AvailabilitySource::Live);
        assert_eq!(
            result.insufficient_items,
            vec![InsufficientItem {
                product_id: "b".into(),
                product_name: "Product B".into(),
                required: 10,
                available: 2,
                missing: 8,
            }]
        );

        h.session.open_checkout().unwrap();
        assert!(matches!(
            h.session.advance().await,
            Err(SyncError::Core(CoreError::StockNotValidated(_)))
        ));
        assert_eq!(h.session.checkout_step(), Some(CheckoutStep::Validation));
    }

    #[tokio::test]
    async fn test_offline_checkout_advances_without_stock() {
        let h = harness(false, &[]).await;
        h.session
            .add_item(CartLine::new("b", "Product B", 10, 100, 2))
            .unwrap();

        to_confirmation(&h.session).await;
        assert_eq!(h.stock.calls(), 0);
    }

    #[tokio::test]
    async fn test_cached_result_is_rechecked_after_reconnect() {
        let h = harness(false, &[("b", 2)]).await;
        h.session
            .add_item(CartLine::new("b", "Product B", 10, 100, 2))
            .unwrap();

        let cached = h.session.validate_cart_stock().await;
        assert!(!cached.is_valid);
        assert_eq!(cached.source, AvailabilitySource::Cached);

        let connectivity = h.session.connectivity();
        connectivity.start().await;
        let mut state = connectivity.watch();
        connectivity.report_online();
        tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| s.online))
            .await
            .unwrap()
            .unwrap();

        h.session.open_checkout().unwrap();
        assert!(matches!(
            h.session.advance().await,
            Err(SyncError::Core(CoreError::StockNotValidated(_)))
        ));
        assert_eq!(h.session.checkout_step(), Some(CheckoutStep::Validation));
        assert_eq!(h.stock.calls(), 1);
        assert_eq!(
            h.session.validation_result().map(|r| r.source),
            Some(AvailabilitySource::Live)
        );

        connectivity.shutdown().await;
    }

    #[tokio::test]
    async fn test_connection_lost_mid_submission_queues_once() {
        let h = harness(true, &[("a", 5)]).await;
        h.session.add_item(product_a(3)).unwrap();
        to_confirmation(&h.session).await;

        // The server records the sale but the response is lost.
        h.sales.lose_next_responses(1);
        let outcome = h.session.process_sale(None, None).await.unwrap();
        assert!(matches!(outcome, SaleOutcome::Queued { .. }));

        let records = h.session.offline_sales().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, OfflineSaleStatus::Pending);
        assert_eq!(h.db.sync_queue().list().await.unwrap().len(), 1);

        let report = h.session.force_sync().await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(h.sales.sale_count(), 1);
        assert!(h.sales.has_sale(outcome.client_sale_id()));
    }

    #[tokio::test]
    async fn test_server_rejection_keeps_cart() {
        let h = harness(true, &[("a", 5)]).await;
        h.session.add_item(product_a(3)).unwrap();
        to_confirmation(&h.session).await;

        h.sales.fail_next(vec![RemoteError::Rejected {
            status: Some(422),
            reason: "customer account closed".into(),
        }]);
        let err = h.session.process_sale(None, None).await.unwrap_err();
        assert!(matches!(err, SyncError::SubmissionRejected(_)));

        let cart = h.session.cart();
        assert_eq!(cart.lines().len(), 1);
        assert!(!cart.is_locked());
        assert_eq!(h.session.checkout_step(), Some(CheckoutStep::Confirmation));
        assert!(h.session.offline_sales().await.unwrap().is_empty());
        assert_eq!(h.session.queue_size().await.unwrap(), 0);

        let notes = h.session.notifications();
        assert_eq!(notes[0].kind, NotificationKind::SaleRejected);
        assert!(notes[0].kind.needs_attention());
    }

    #[tokio::test]
    async fn test_stock_change_before_submit_returns_to_validation() {
        let h = harness(true, &[("a", 5)]).await;
        h.session.add_item(product_a(3)).unwrap();
        to_confirmation(&h.session).await;

        h.stock.set_levels(&[("a", 1)]);
        let err = h.session.process_sale(None, None).await.unwrap_err();
        assert!(matches!(err, SyncError::ValidationFailed(_)));

        assert_eq!(h.session.checkout_step(), Some(CheckoutStep::Validation));
        let rejection = h.session.checkout_rejection().unwrap();
        assert_eq!(rejection.insufficient_items[0].missing, 2);
        assert!(!h.session.cart().is_locked());
        assert_eq!(h.session.cart().lines().len(), 1);
        assert_eq!(h.sales.calls(), 0);
    }

    #[tokio::test]
    async fn test_cart_locked_during_submission() {
        let h = harness(true, &[("a", 5)]).await;
        h.session.add_item(product_a(3)).unwrap();
        to_confirmation(&h.session).await;
        h.sales.set_delay(Duration::from_millis(150));

        let submit = tokio::spawn({
            let session = h.session.clone();
            async move { session.process_sale(None, None).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            h.session.add_item(product_a(1)),
            Err(SyncError::Core(CoreError::CartLocked))
        ));
        assert!(matches!(
            h.session.cancel(),
            Err(SyncError::Core(CoreError::SubmissionInFlight))
        ));

        let outcome = submit.await.unwrap().unwrap();
        assert!(matches!(outcome, SaleOutcome::Confirmed { .. }));
        h.session.add_item(product_a(1)).unwrap();
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_cart() {
        let h = harness(false, &[]).await;
        h.session.add_item(product_a(3)).unwrap();
        to_confirmation(&h.session).await;

        h.db.close().await;
        let err = h.session.process_sale(None, None).await.unwrap_err();
        assert!(matches!(err, SyncError::PersistenceFailure(_)));

        assert_eq!(h.session.cart().lines().len(), 1);
        assert!(!h.session.cart().is_locked());
        assert_eq!(h.session.checkout_step(), Some(CheckoutStep::Confirmation));

        let notes = h.session.notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::PersistenceFailure);
        assert!(h.session.dismiss_notification(notes[0].id));
        assert!(h.session.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_cart_edits_are_validated_after_debounce() {
        let h = harness(true, &[("a", 5)]).await;
        h.session.add_item(product_a(1)).unwrap();
        h.session.add_item(product_a(1)).unwrap();
        h.session.update_quantity("a", 4).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        let result = h.session.validation_result().unwrap();
        assert!(result.is_server_confirmed());
        assert_eq!(h.stock.calls(), 1);
        assert_eq!(h.session.summary().item_count, 4);
    }

    #[tokio::test]
    async fn test_cancel_discards_details() {
        let h = harness(false, &[]).await;
        h.session.add_item(product_a(1)).unwrap();
        h.session.open_checkout().unwrap();
        h.session
            .set_details(Some("c-1".into()), Some("no bag".into()))
            .unwrap();
        assert_eq!(h.session.checkout_details().customer_id.as_deref(), Some("c-1"));

        h.session.cancel().unwrap();
        assert_eq!(h.session.checkout_step(), None);
        assert_eq!(h.session.checkout_details(), SaleDetails::default());
        assert_eq!(h.session.cart().lines().len(), 1);
        assert_eq!(h.session.queue_size().await.unwrap(), 0);
    }
}
