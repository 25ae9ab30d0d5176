//! # Remote Collaborator Ports
//!
//! Traits for everything the pipeline needs from outside the terminal.
//! [`crate::http::HttpBackend`] implements all of them against the store
//! backend; tests plug in in-memory fakes.
//!
//! ```text
//! ┌──────────────────────┐        ┌───────────────────────────────────────┐
//! │  StockValidation-    │──────► │ StockService::get_availability(ids)   │
//! │  Engine              │        └───────────────────────────────────────┘
//! ├──────────────────────┤        ┌───────────────────────────────────────┐
//! │  PosSession          │──────► │ SaleService::create_sale(payload)     │
//! │  SyncEngine          │──────► │ SaleService::apply_operation(op)      │
//! ├──────────────────────┤        └───────────────────────────────────────┘
//! │  PosSession          │        ┌───────────────────────────────────────┐
//! │  SyncEngine          │──────► │ EventSink::publish(event)             │
//! ├──────────────────────┤        └───────────────────────────────────────┘
//! │  ConnectivityMonitor │──────► ConnectivityProbe::probe()
//! └──────────────────────┘
//! ```
//!
//! ## Idempotency
//! `create_sale` may be called more than once for the same
//! `client_sale_id` (a timeout after the server committed, a crash before
//! the local queue was updated). Implementations must make the server
//! treat repeats as the same sale.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use till_core::{SaleEvent, SalePayload, SaleReceipt, SyncOperation};

use crate::error::RemoteError;

/// Current availability of products.
#[async_trait]
pub trait StockService: Send + Sync {
    /// Available quantity per product id. Ids the service does not know
    /// are left out of the map.
    async fn get_availability(
        &self,
        product_ids: &[String],
    ) -> Result<HashMap<String, i64>, RemoteError>;
}

/// Server-side sale recording.
#[async_trait]
pub trait SaleService: Send + Sync {
    /// Records a sale. `payload.client_sale_id` is the dedup key.
    async fn create_sale(&self, payload: &SalePayload) -> Result<SaleReceipt, RemoteError>;

    /// Delivers a queued operation that is not a sale creation.
    /// `op.id` is the dedup key.
    async fn apply_operation(&self, op: &SyncOperation) -> Result<(), RemoteError> {
        Err(RemoteError::rejected(format!(
            "unsupported operation {:?} on {}",
            op.kind, op.entity
        )))
    }
}

/// Downstream consumer of confirmed sales (receipts, reporting).
///
/// Fire-and-forget: the pipeline never waits on or fails because of it.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: SaleEvent);
}

/// Sink that drops every event.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn publish(&self, _event: SaleEvent) {}
}

/// Reachability check used by the connectivity monitor.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Round-trip latency of a health check.
    async fn probe(&self) -> Result<Duration, RemoteError>;
}
