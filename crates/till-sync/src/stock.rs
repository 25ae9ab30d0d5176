//! # Stock Validation Engine
//!
//! Answers "can this cart be sold?" with the freshest availability the
//! terminal can get.
//!
//! ## Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         validate(lines)                                 │
//! │                              │                                          │
//! │                 online? ─────┴───── offline?                           │
//! │                    │                    │                               │
//! │                    ▼                    │                               │
//! │          StockService (live)            │                               │
//! │           │           │                 │                               │
//! │         ok│      error│                 │                               │
//! │           │           └────────────────►▼                               │
//! │           │                   stock_snapshots (cached)                  │
//! │           ▼                             │                               │
//! │   refresh snapshots                     │                               │
//! │           │                             │                               │
//! │           ▼                             ▼                               │
//! │   result.source = Live        result.source = Cached                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Debounce
//! Every request takes the next sequence number. A debounced request
//! sleeps first and is dropped without a lookup if a newer one was issued
//! meanwhile. A result whose request is no longer the newest is discarded,
//! so the published result always belongs to the latest request.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, warn};

use till_core::stock::{check_against_snapshots, check_availability};
use till_core::{CartLine, StockValidationResult};
use till_db::Database;

use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::ports::StockService;

/// A published result and the cart revision it was computed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartValidation {
    pub revision: u64,
    pub result: StockValidationResult,
}

/// Live/cached stock validation with debounced, ordered publication.
pub struct StockValidationEngine {
    db: Arc<Database>,
    stock: Arc<dyn StockService>,
    connectivity: Arc<ConnectivityMonitor>,
    debounce: Duration,
    seq: AtomicU64,
    latest_tx: watch::Sender<Option<CartValidation>>,
}

impl StockValidationEngine {
    pub fn new(
        db: Arc<Database>,
        stock: Arc<dyn StockService>,
        connectivity: Arc<ConnectivityMonitor>,
        debounce: Duration,
    ) -> Self {
        let (latest_tx, _) = watch::channel(None);
        StockValidationEngine {
            db,
            stock,
            connectivity,
            debounce,
            seq: AtomicU64::new(0),
            latest_tx,
        }
    }

    // =========================================================================
    // One-shot Validation
    // =========================================================================

    /// Validates against the live service when online, falling back to the
    /// snapshot cache when offline or when the lookup fails.
    pub async fn validate(&self, lines: &[CartLine]) -> StockValidationResult {
        if lines.is_empty() {
            return StockValidationResult::empty_cart();
        }

        if self.connectivity.is_online() {
            match self.validate_live(lines).await {
                Ok(result) => return result,
                Err(e) => warn!(error = %e, "Live stock check failed, using cached snapshots"),
            }
        }

        self.validate_cached(lines).await
    }

    /// Validates against the live service only.
    ///
    /// A lookup failure is reported as `NetworkUnavailable`, never as a
    /// stock problem.
    pub async fn validate_live(&self, lines: &[CartLine]) -> SyncResult<StockValidationResult> {
        if lines.is_empty() {
            return Ok(StockValidationResult::empty_cart());
        }

        let product_ids = product_ids(lines);
        let availability = match self.stock.get_availability(&product_ids).await {
            Ok(availability) => {
                self.connectivity.report_online();
                availability
            }
            Err(e) => {
                if e.is_retryable() {
                    self.connectivity.report_offline();
                }
                return Err(SyncError::NetworkUnavailable(e.to_string()));
            }
        };

        self.refresh_snapshots(&availability).await;

        let result = check_availability(lines, &availability);
        debug!(
            lines = lines.len(),
            valid = result.is_valid,
            short = result.insufficient_items.len(),
            "Live stock check"
        );
        Ok(result)
    }

    /// Validates against the snapshot cache only.
    ///
    /// A storage error degrades to each line's own `max_available`.
    pub async fn validate_cached(&self, lines: &[CartLine]) -> StockValidationResult {
        if lines.is_empty() {
            return StockValidationResult::empty_cart();
        }

        let snapshots = match self.db.stock_snapshots().get_many(&product_ids(lines)).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(error = %e, "Stock snapshot lookup failed");
                Vec::new()
            }
        };

        let result = check_against_snapshots(lines, &snapshots);
        debug!(
            lines = lines.len(),
            cached = snapshots.len(),
            valid = result.is_valid,
            "Cached stock check"
        );
        result
    }

    async fn refresh_snapshots(&self, availability: &HashMap<String, i64>) {
        if let Err(e) = self
            .db
            .stock_snapshots()
            .upsert_many(availability, Utc::now())
            .await
        {
            warn!(error = %e, "Failed to refresh stock snapshots");
        }
    }

    // =========================================================================
    // Ordered Requests
    // =========================================================================

    /// Debounced validation of `lines` at cart `revision`.
    ///
    /// The request is ordered when this is called, not when the returned
    /// future is first polled. The future yields `None` if the request was
    /// superseded, either before the lookup (no network call) or while it
    /// was running (result discarded).
    pub fn request(
        self: &Arc<Self>,
        lines: Vec<CartLine>,
        revision: u64,
    ) -> impl Future<Output = Option<StockValidationResult>> + Send + 'static {
        let seq = self.next_seq();
        let engine = Arc::clone(self);

        async move {
            tokio::time::sleep(engine.debounce).await;
            if !engine.is_latest(seq) {
                debug!(seq, revision, "Validation request superseded before lookup");
                return None;
            }

            engine.run(seq, &lines, revision).await
        }
    }

    /// Immediate validation of `lines` at cart `revision`, superseding
    /// any pending debounced request.
    pub async fn validate_now(&self, lines: &[CartLine], revision: u64) -> StockValidationResult {
        let seq = self.next_seq();
        match self.run(seq, lines, revision).await {
            Some(result) => result,
            // Superseded while running: still answer the caller.
            None => self.validate_cached(lines).await,
        }
    }

    /// Publishes a result computed elsewhere (the final check of a
    /// submission) for `revision`.
    pub fn publish(&self, result: StockValidationResult, revision: u64) {
        let seq = self.next_seq();
        self.publish_if_latest(seq, CartValidation { revision, result });
    }

    async fn run(&self, seq: u64, lines: &[CartLine], revision: u64) -> Option<StockValidationResult> {
        let result = self.validate(lines).await;

        let published = self.publish_if_latest(
            seq,
            CartValidation {
                revision,
                result: result.clone(),
            },
        );
        if !published {
            debug!(seq, revision, "Discarding stale validation result");
            return None;
        }
        Some(result)
    }

    fn publish_if_latest(&self, seq: u64, validation: CartValidation) -> bool {
        self.latest_tx.send_if_modified(|latest| {
            if self.seq.load(Ordering::SeqCst) != seq {
                return false;
            }
            *latest = Some(validation);
            true
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_latest(&self, seq: u64) -> bool {
        self.seq.load(Ordering::SeqCst) == seq
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Latest published result.
    pub fn latest(&self) -> Option<CartValidation> {
        self.latest_tx.borrow().clone()
    }

    /// Latest result, if it was computed for `revision`.
    pub fn latest_for(&self, revision: u64) -> Option<StockValidationResult> {
        self.latest_tx
            .borrow()
            .as_ref()
            .filter(|v| v.revision == revision)
            .map(|v| v.result.clone())
    }

    pub fn watch(&self) -> watch::Receiver<Option<CartValidation>> {
        self.latest_tx.subscribe()
    }
}

fn product_ids(lines: &[CartLine]) -> Vec<String> {
    lines.iter().map(|l| l.product_id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectivitySettings;
    use crate::fakes::FakeStockService;
    use till_core::{AvailabilitySource, InsufficientItem};
    use till_db::DbConfig;

    fn line(id: &str, qty: i64, max: i64) -> CartLine {
        CartLine::new(id, format!("Product {}", id.to_uppercase()), qty, 250, max)
    }

    async fn engine(
        stock: Arc<FakeStockService>,
        online: bool,
    ) -> (StockValidationEngine, Arc<Database>) {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let connectivity = Arc::new(ConnectivityMonitor::new(
            ConnectivitySettings::default(),
            online,
        ));
        let engine = StockValidationEngine::new(
            db.clone(),
            stock,
            connectivity,
            Duration::from_millis(50),
        );
        (engine, db)
    }

    #[tokio::test]
    async fn test_live_validation_lists_short_lines() {
        let stock = Arc::new(FakeStockService::with(&[("a", 5), ("b", 2)]));
        let (engine, _db) = engine(stock, true).await;

        let ok = engine.validate(&[line("a", 3, 5)]).await;
        assert!(ok.is_valid);
        assert!(ok.insufficient_items.is_empty());
        assert!(ok.is_server_confirmed());

        let short = engine.validate(&[line("a", 3, 5), line("b", 10, 2)]).await;
        assert!(!short.is_valid);
        assert_eq!(
            short.insufficient_items,
            vec![InsufficientItem {
                product_id: "b".into(),
                product_name: "Product B".into(),
                required: 10,
                available: 2,
                missing: 8,
            }]
        );
    }

    #[tokio::test]
    async fn test_empty_cart_needs_no_lookup() {
        let stock = Arc::new(FakeStockService::default());
        let (engine, _db) = engine(stock.clone(), true).await;

        assert!(engine.validate(&[]).await.is_empty_cart());
        assert_eq!(stock.calls(), 0);
    }

    #[tokio::test]
    async fn test_live_failure_is_network_unavailable() {
        let stock = Arc::new(FakeStockService::with(&[("b", 2)]));
        stock.set_down(true);
        let (engine, _db) = engine(stock, true).await;

        let err = engine.validate_live(&[line("b", 10, 2)]).await.unwrap_err();
        assert!(matches!(err, SyncError::NetworkUnavailable(_)));
    }

    #[tokio::test]
    async fn test_falls_back_to_snapshots() {
        let stock = Arc::new(FakeStockService::with(&[("a", 1)]));
        let (engine, db) = engine(stock.clone(), true).await;

        // A live check leaves a snapshot behind.
        engine.validate(&[line("a", 1, 5)]).await;
        assert_eq!(db.stock_snapshots().get("a").await.unwrap().unwrap().available, 1);

        stock.set_down(true);
        let result = engine.validate(&[line("a", 3, 5)]).await;
        assert_eq!(result.source, AvailabilitySource::Cached);
        assert!(!result.is_valid);
        assert_eq!(result.insufficient_items[0].available, 1);
        assert!(result.stale_as_of.is_some());
    }

    #[tokio::test]
    async fn test_offline_uses_cache_without_lookup() {
        let stock = Arc::new(FakeStockService::with(&[("a", 0)]));
        let (engine, _db) = engine(stock.clone(), false).await;

        let result = engine.validate(&[line("a", 3, 5)]).await;
        assert_eq!(stock.calls(), 0);
        assert_eq!(result.source, AvailabilitySource::Cached);
        assert!(result.is_valid);
        assert!(!result.is_server_confirmed());
    }

    #[tokio::test]
    async fn test_superseded_request_makes_no_lookup() {
        let stock = Arc::new(FakeStockService::with(&[("a", 5)]));
        let (engine, _db) = engine(stock.clone(), true).await;
        let engine = Arc::new(engine);

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.request(vec![line("a", 1, 5)], 1).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = engine.request(vec![line("a", 2, 5)], 2).await;

        assert!(first.await.unwrap().is_none());
        assert!(second.unwrap().is_valid);
        assert_eq!(stock.calls(), 1);
        assert_eq!(engine.latest().unwrap().revision, 2);
    }

    #[tokio::test]
    async fn test_stale_result_is_discarded() {
        let stock = Arc::new(FakeStockService::with(&[("a", 5)]));
        stock.set_delay(Duration::from_millis(200));
        let (engine, _db) = engine(stock.clone(), true).await;
        let engine = Arc::new(engine);

        // The first lookup is in flight when the cart changes again.
        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.request(vec![line("a", 9, 5)], 1).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = engine.request(vec![line("a", 2, 5)], 2).await;

        assert!(first.await.unwrap().is_none());
        assert!(second.unwrap().is_valid);

        let latest = engine.latest().unwrap();
        assert_eq!(latest.revision, 2);
        assert!(latest.result.is_valid);
        assert!(engine.latest_for(1).is_none());
    }
}
