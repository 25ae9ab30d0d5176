//! # till-db: Local Storage for the Sale Pipeline
//!
//! SQLite persistence for offline sales, the sync queue and cached stock
//! snapshots. Nothing here talks to the network.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Till Data Flow                                   │
//! │                                                                         │
//! │  PosSession::process_sale (offline path)      SyncEngine::drain        │
//! │       │                                              │                  │
//! │       ▼                                              ▼                  │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     till-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌─────────────┐ │   │
//! │  │   │   Database    │    │   Repositories     │  │ Migrations  │ │   │
//! │  │   │   (pool.rs)   │    │                    │  │ (embedded)  │ │   │
//! │  │   │               │◄───│ OfflineSaleRepo    │  │ 001_offline │ │   │
//! │  │   │ SqlitePool    │    │ SyncQueueRepo      │  │ _pipeline   │ │   │
//! │  │   │ record_offline│    │ StockSnapshotRepo  │  │             │ │   │
//! │  │   │ _sale (tx)    │    │                    │  │             │ │   │
//! │  │   └───────────────┘    └────────────────────┘  └─────────────┘ │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │   SQLite file in the platform data dir (till.db)                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool, outbox transaction
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Offline sales, sync queue, stock snapshots
//!
//! ## Usage
//!
//! ```rust,ignore
//! use till_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("till.db")).await?;
//! db.record_offline_sale(&record, &op).await?;
//! let pending = db.sync_queue().ready(Utc::now(), 50).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::offline_sale::OfflineSaleRepository;
pub use repository::stock_snapshot::StockSnapshotRepository;
pub use repository::sync_queue::SyncQueueRepository;
