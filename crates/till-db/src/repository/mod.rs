//! # Repository Module
//!
//! Typed access to the three local collections of the pipeline.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Caller                        Repository                 Table         │
//! │  ──────                        ──────────                 ─────         │
//! │  checkout (offline path) ──┐                                            │
//! │                            ├─► OfflineSaleRepository ──► offline_sales  │
//! │  sync engine ──────────────┤                                            │
//! │                            └─► SyncQueueRepository ───► sync_queue      │
//! │  validation engine ──────────► StockSnapshotRepository ► stock_snapshots│
//! │                                                                         │
//! │  Writes that span two tables (record + op) go through `Database`       │
//! │  so they share one transaction.                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each repository exposes connection-level functions (`pub(crate)`) that
//! the transactional helpers in [`crate::pool`] compose, plus pool-level
//! methods for single-table work.

pub mod offline_sale;
pub mod stock_snapshot;
pub mod sync_queue;
