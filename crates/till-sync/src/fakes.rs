//! In-memory stand-ins for the remote services, used by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use till_core::{SaleEvent, SalePayload, SaleReceipt, SyncOperation};

use crate::error::RemoteError;
use crate::ports::{EventSink, SaleService, StockService};

// =============================================================================
// Stock
// =============================================================================

#[derive(Default)]
pub(crate) struct FakeStockService {
    availability: Mutex<HashMap<String, i64>>,
    down: AtomicBool,
    calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeStockService {
    pub(crate) fn with(levels: &[(&str, i64)]) -> Self {
        let fake = FakeStockService::default();
        fake.set_levels(levels);
        fake
    }

    pub(crate) fn set_levels(&self, levels: &[(&str, i64)]) {
        let mut availability = self.availability.lock().unwrap();
        for (id, n) in levels {
            availability.insert(id.to_string(), *n);
        }
    }

    pub(crate) fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StockService for FakeStockService {
    async fn get_availability(
        &self,
        product_ids: &[String],
    ) -> Result<HashMap<String, i64>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.down.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("stock service unreachable".into()));
        }

        let availability = self.availability.lock().unwrap();
        Ok(product_ids
            .iter()
            .filter_map(|id| availability.get(id).map(|n| (id.clone(), *n)))
            .collect())
    }
}

// =============================================================================
// Sales
// =============================================================================

/// Server that dedups sales by `client_sale_id`, like the real one.
#[derive(Default)]
pub(crate) struct FakeSaleService {
    sales: Mutex<HashMap<String, String>>,
    applied: Mutex<HashSet<String>>,
    calls: AtomicUsize,
    scripted: Mutex<VecDeque<RemoteError>>,
    always: Mutex<Option<RemoteError>>,
    lose_responses: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeSaleService {
    /// The next calls fail with `errors`, in order.
    pub(crate) fn fail_next(&self, errors: Vec<RemoteError>) {
        self.scripted.lock().unwrap().extend(errors);
    }

    /// Every call fails with `error` until cleared with `None`.
    pub(crate) fn fail_always(&self, error: Option<RemoteError>) {
        *self.always.lock().unwrap() = error;
    }

    /// The next `n` sales are recorded but the caller sees a timeout.
    pub(crate) fn lose_next_responses(&self, n: usize) {
        self.lose_responses.store(n, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn sale_count(&self) -> usize {
        self.sales.lock().unwrap().len()
    }

    pub(crate) fn has_sale(&self, client_sale_id: &str) -> bool {
        self.sales.lock().unwrap().contains_key(client_sale_id)
    }

    pub(crate) fn applied_count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }

    fn next_failure(&self) -> Option<RemoteError> {
        if let Some(err) = self.always.lock().unwrap().clone() {
            return Some(err);
        }
        self.scripted.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl SaleService for FakeSaleService {
    async fn create_sale(&self, payload: &SalePayload) -> Result<SaleReceipt, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.next_failure() {
            return Err(err);
        }

        let sale_id = {
            let mut sales = self.sales.lock().unwrap();
            let next = format!("srv-{}", sales.len() + 1);
            sales
                .entry(payload.client_sale_id.clone())
                .or_insert(next)
                .clone()
        };

        let lost = self
            .lose_responses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Err(RemoteError::Network("response lost".into()));
        }

        Ok(SaleReceipt { sale_id })
    }

    async fn apply_operation(&self, op: &SyncOperation) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.next_failure() {
            return Err(err);
        }
        self.applied.lock().unwrap().insert(op.id.clone());
        Ok(())
    }
}

// =============================================================================
// Events
// =============================================================================

#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<SaleEvent>>,
}

impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<SaleEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: SaleEvent) {
        self.events.lock().unwrap().push(event);
    }
}
