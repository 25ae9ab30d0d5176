//! # Domain Types
//!
//! Types shared by the cart, the checkout, the local store and the sync engine.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────────┐   ┌─────────────────┐  │
//! │  │    CartLine     │   │ StockValidationResult│   │  SalePayload    │  │
//! │  │  ─────────────  │   │  ──────────────────  │   │  ─────────────  │  │
//! │  │  product_id     │   │  is_valid            │   │  client_sale_id │  │
//! │  │  quantity       │──►│  insufficient_items  │   │  items          │  │
//! │  │  max_available  │   │  source: Live/Cached │   │  total_cents    │  │
//! │  └─────────────────┘   └──────────────────────┘   └────────┬────────┘  │
//! │                                                            │           │
//! │                          offline / fallback path           ▼           │
//! │  ┌─────────────────────────────┐        ┌─────────────────────────────┐│
//! │  │     OfflineSaleRecord       │◄──────►│       SyncOperation         ││
//! │  │  status: pending → syncing  │  same  │  id (idempotent)            ││
//! │  │          → synced | failed  │  sale  │  priority, retry_count      ││
//! │  └─────────────────────────────┘        └─────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Identities per Offline Sale
//! - `OfflineSaleRecord.id` doubles as `SalePayload.client_sale_id`, the
//!   server-side dedup token for the sale itself.
//! - `SyncOperation.id` identifies the queued delivery attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::money::Money;
use crate::{ENTITY_SALE, PRIORITY_SALE};

// =============================================================================
// Cart Line
// =============================================================================

/// One product line in the cart.
///
/// `quantity` may exceed `max_available` for a while; the line is flagged,
/// not rejected, so the cashier can correct it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartLine {
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    /// Availability known when the line was added (catalog or last lookup).
    pub max_available: i64,
}

impl CartLine {
    /// Creates a cart line.
    pub fn new(
        product_id: impl Into<String>,
        product_name: impl Into<String>,
        quantity: i64,
        unit_price_cents: i64,
        max_available: i64,
    ) -> Self {
        CartLine {
            product_id: product_id.into(),
            product_name: product_name.into(),
            quantity,
            unit_price_cents,
            max_available,
        }
    }

    /// Unit price as Money.
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// Line total (unit price × quantity).
    #[inline]
    pub fn line_total(&self) -> Money {
        self.unit_price().multiply_quantity(self.quantity)
    }

    /// True when more units are requested than were known to be available.
    #[inline]
    pub fn exceeds_available(&self) -> bool {
        self.quantity > self.max_available
    }
}

// =============================================================================
// Cart Summary
// =============================================================================

/// Derived totals for the current line set. Never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartSummary {
    /// Sum of quantities across all lines.
    pub item_count: i64,
    pub total_amount_cents: i64,
    pub has_items: bool,
}

// =============================================================================
// Stock Validation
// =============================================================================

/// A line that asks for more units than are available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InsufficientItem {
    pub product_id: String,
    pub product_name: String,
    pub required: i64,
    pub available: i64,
    /// Always `required - available`.
    pub missing: i64,
}

/// Why a validation came back invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFailure {
    /// Nothing to validate. Not a stock problem.
    EmptyCart,
    /// At least one line exceeds availability.
    InsufficientStock,
}

/// Where the availability figures came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilitySource {
    /// Answered by the stock service just now.
    Live,
    /// Answered from the local snapshot cache; possibly stale.
    Cached,
}

/// Outcome of one validation call. Immutable; the next call supersedes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockValidationResult {
    pub is_valid: bool,
    pub error_message: Option<String>,
    pub insufficient_items: Vec<InsufficientItem>,
    pub failure: Option<ValidationFailure>,
    pub source: AvailabilitySource,
    /// Oldest snapshot used for a cached result.
    #[ts(as = "Option<String>")]
    pub stale_as_of: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub checked_at: DateTime<Utc>,
}

impl StockValidationResult {
    /// Result for an empty cart.
    pub fn empty_cart() -> Self {
        StockValidationResult {
            is_valid: false,
            error_message: Some("Cart is empty".to_string()),
            insufficient_items: Vec::new(),
            failure: Some(ValidationFailure::EmptyCart),
            source: AvailabilitySource::Live,
            stale_as_of: None,
            checked_at: Utc::now(),
        }
    }

    /// Marks the result as computed from cached snapshots.
    pub fn from_cache(mut self, stale_as_of: Option<DateTime<Utc>>) -> Self {
        self.source = AvailabilitySource::Cached;
        self.stale_as_of = stale_as_of;
        self
    }

    /// Valid according to the stock service itself, not a cached snapshot.
    #[inline]
    pub fn is_server_confirmed(&self) -> bool {
        self.is_valid && self.source == AvailabilitySource::Live
    }

    #[inline]
    pub fn is_empty_cart(&self) -> bool {
        self.failure == Some(ValidationFailure::EmptyCart)
    }
}

/// Last-known availability of one product, kept for offline validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockSnapshot {
    pub product_id: String,
    pub available: i64,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Sale Payload
// =============================================================================

/// One item of a submitted sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleItem {
    pub product_id: String,
    pub name: String,
    pub quantity: i64,
    pub price_cents: i64,
}

impl From<&CartLine> for SaleItem {
    fn from(line: &CartLine) -> Self {
        SaleItem {
            product_id: line.product_id.clone(),
            name: line.product_name.clone(),
            quantity: line.quantity,
            price_cents: line.unit_price_cents,
        }
    }
}

/// Body of a sale creation, identical on the direct and the queued path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SalePayload {
    /// Server-side dedup token. Replaying the same id must not create a
    /// second sale.
    pub client_sale_id: String,
    pub terminal_id: String,
    pub items: Vec<SaleItem>,
    pub customer_id: Option<String>,
    pub note: Option<String>,
    pub total_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl SalePayload {
    /// Builds a payload from cart lines with a fresh client sale id.
    pub fn from_lines(
        terminal_id: impl Into<String>,
        lines: &[CartLine],
        customer_id: Option<String>,
        note: Option<String>,
    ) -> Self {
        let total: Money = lines.iter().map(CartLine::line_total).sum();
        SalePayload {
            client_sale_id: Uuid::new_v4().to_string(),
            terminal_id: terminal_id.into(),
            items: lines.iter().map(SaleItem::from).collect(),
            customer_id,
            note,
            total_cents: total.cents(),
            created_at: Utc::now(),
        }
    }
}

/// What the sale service answers on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleReceipt {
    pub sale_id: String,
}

/// Announcement of a completed sale, sent to the event sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleEvent {
    pub client_sale_id: String,
    pub server_sale_id: String,
    pub total_cents: i64,
    /// True when the sale was confirmed by the sync engine after an offline
    /// checkout.
    pub was_offline: bool,
    #[ts(as = "String")]
    pub occurred_at: DateTime<Utc>,
}

// =============================================================================
// Sync Operation
// =============================================================================

/// Kind of mutation a queued operation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// Queue-level status of an operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Waiting for delivery (possibly scheduled via `next_attempt_at`).
    #[default]
    Queued,
    /// Gave up: retries used up or the server refused it outright.
    Exhausted,
}

/// A durable, idempotent mutation waiting to reach the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncOperation {
    /// Client-generated UUID v4; the idempotency key for non-sale ops.
    pub id: String,
    pub kind: OperationKind,
    /// Entity name, e.g. `"sale"`.
    pub entity: String,
    pub entity_id: String,
    #[ts(type = "unknown")]
    pub payload: serde_json::Value,
    /// Higher drains first.
    pub priority: i64,
    pub retry_count: i64,
    pub status: OperationStatus,
    pub last_error: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    /// Earliest time the next automatic attempt may run.
    #[ts(as = "Option<String>")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl SyncOperation {
    /// Creates a queued operation with a fresh id.
    pub fn new(
        kind: OperationKind,
        entity: impl Into<String>,
        entity_id: impl Into<String>,
        payload: serde_json::Value,
        priority: i64,
    ) -> Self {
        SyncOperation {
            id: Uuid::new_v4().to_string(),
            kind,
            entity: entity.into(),
            entity_id: entity_id.into(),
            payload,
            priority,
            retry_count: 0,
            status: OperationStatus::Queued,
            last_error: None,
            created_at: Utc::now(),
            next_attempt_at: None,
        }
    }

    /// Sale creation wrapping `payload`, at the highest priority.
    pub fn create_sale(payload: &SalePayload) -> CoreResult<Self> {
        Ok(SyncOperation::new(
            OperationKind::Create,
            ENTITY_SALE,
            payload.client_sale_id.clone(),
            serde_json::to_value(payload)?,
            PRIORITY_SALE,
        ))
    }

    /// True for sale creations.
    #[inline]
    pub fn is_sale_creation(&self) -> bool {
        self.kind == OperationKind::Create && self.entity == ENTITY_SALE
    }

    /// Decodes the sale payload of a sale creation.
    pub fn sale_payload(&self) -> CoreResult<SalePayload> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Whether an automatic attempt may run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OperationStatus::Queued && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

// =============================================================================
// Offline Sale Record
// =============================================================================

/// Lifecycle of an offline sale.
///
/// ```text
///   pending ──► syncing ──► synced          (terminal)
///                  │  ▲
///                  ▼  │
///                 failed                    (terminal once needs_attention)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum OfflineSaleStatus {
    #[default]
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl OfflineSaleStatus {
    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `syncing → pending` and `failed → pending` exist for crash recovery
    /// and manual re-queueing respectively.
    pub fn can_transition_to(self, next: OfflineSaleStatus) -> bool {
        use OfflineSaleStatus::*;
        matches!(
            (self, next),
            (Pending, Syncing)
                | (Syncing, Synced)
                | (Syncing, Failed)
                | (Syncing, Pending)
                | (Failed, Syncing)
                | (Failed, Pending)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OfflineSaleStatus::Pending => "pending",
            OfflineSaleStatus::Syncing => "syncing",
            OfflineSaleStatus::Synced => "synced",
            OfflineSaleStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OfflineSaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sale taken while the server could not confirm it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OfflineSaleRecord {
    /// Same value as the payload's `client_sale_id`.
    pub id: String,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
    pub items: Vec<SaleItem>,
    pub customer_id: Option<String>,
    pub note: Option<String>,
    pub total_cents: i64,
    pub status: OfflineSaleStatus,
    pub retry_count: i64,
    pub sync_operation_id: Option<String>,
    pub last_error: Option<String>,
    /// Set once the server confirmed the sale.
    pub server_sale_id: Option<String>,
    #[ts(as = "Option<String>")]
    pub synced_at: Option<DateTime<Utc>>,
    /// Terminal failure; only an operator can move it on.
    pub needs_attention: bool,
}

impl OfflineSaleRecord {
    /// Builds the pending record for a payload and its queued operation.
    pub fn pending(payload: &SalePayload, sync_operation_id: &str) -> Self {
        OfflineSaleRecord {
            id: payload.client_sale_id.clone(),
            timestamp: payload.created_at,
            items: payload.items.clone(),
            customer_id: payload.customer_id.clone(),
            note: payload.note.clone(),
            total_cents: payload.total_cents,
            status: OfflineSaleStatus::Pending,
            retry_count: 0,
            sync_operation_id: Some(sync_operation_id.to_string()),
            last_error: None,
            server_sale_id: None,
            synced_at: None,
            needs_attention: false,
        }
    }

    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    /// Synced, or failed with no automatic retry left.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            OfflineSaleStatus::Synced => true,
            OfflineSaleStatus::Failed => self.needs_attention,
            _ => false,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> SalePayload {
        SalePayload::from_lines(
            "till-1",
            &[
                CartLine::new("a", "Product A", 3, 250, 5),
                CartLine::new("c", "Product C", 1, 1000, 1),
            ],
            Some("cust-7".to_string()),
            None,
        )
    }

    #[test]
    fn test_payload_totals_lines() {
        let p = payload();
        assert_eq!(p.total_cents, 1750);
        assert_eq!(p.items.len(), 2);
        assert_eq!(p.items[0].name, "Product A");
        assert_eq!(p.terminal_id, "till-1");
    }

    #[test]
    fn test_sale_operation_wraps_payload() {
        let p = payload();
        let op = SyncOperation::create_sale(&p).unwrap();

        assert!(op.is_sale_creation());
        assert_eq!(op.entity_id, p.client_sale_id);
        assert_eq!(op.priority, PRIORITY_SALE);
        assert_eq!(op.status, OperationStatus::Queued);
        assert_ne!(op.id, p.client_sale_id);
        assert_eq!(op.sale_payload().unwrap(), p);
    }

    #[test]
    fn test_operation_due_respects_schedule() {
        let p = payload();
        let mut op = SyncOperation::create_sale(&p).unwrap();
        let now = Utc::now();
        assert!(op.is_due(now));

        op.next_attempt_at = Some(now + chrono::Duration::seconds(30));
        assert!(!op.is_due(now));
        assert!(op.is_due(now + chrono::Duration::seconds(31)));

        op.next_attempt_at = None;
        op.status = OperationStatus::Exhausted;
        assert!(!op.is_due(now));
    }

    #[test]
    fn test_status_lifecycle() {
        use OfflineSaleStatus::*;
        assert!(Pending.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Synced));
        assert!(Syncing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Syncing));

        assert!(!Pending.can_transition_to(Synced));
        assert!(!Synced.can_transition_to(Pending));
        assert!(!Synced.can_transition_to(Syncing));
        assert!(!Pending.can_transition_to(Failed));
    }

    #[test]
    fn test_pending_record_matches_payload() {
        let p = payload();
        let record = OfflineSaleRecord::pending(&p, "op-1");
        assert_eq!(record.id, p.client_sale_id);
        assert_eq!(record.status, OfflineSaleStatus::Pending);
        assert_eq!(record.sync_operation_id.as_deref(), Some("op-1"));
        assert_eq!(record.total().cents(), 1750);
        assert!(!record.is_terminal());
    }

    #[test]
    fn test_cached_result_is_not_server_confirmed() {
        let live = StockValidationResult {
            is_valid: true,
            error_message: None,
            insufficient_items: vec![],
            failure: None,
            source: AvailabilitySource::Live,
            stale_as_of: None,
            checked_at: Utc::now(),
        };
        assert!(live.is_server_confirmed());

        let cached = live.from_cache(None);
        assert!(cached.is_valid);
        assert!(!cached.is_server_confirmed());
    }
}
