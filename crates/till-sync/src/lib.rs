//! # till-sync: Offline-Tolerant Sale Pipeline for Till
//!
//! The async half of the sale pipeline: stock validation, sale submission
//! with offline fallback, background sync and connectivity tracking.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Sale Pipeline                                  │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    PosSession (upward API)                       │  │
//! │  │                                                                  │  │
//! │  │  Cart edits, checkout steps, process_sale, operator actions      │  │
//! │  └──────┬──────────────────────┬──────────────────────┬─────────────┘  │
//! │         ▼                      ▼                      ▼                 │
//! │  ┌────────────────┐  ┌────────────────────┐  ┌────────────────────┐    │
//! │  │ StockValidation│  │    SyncEngine      │  │ NotificationCenter │    │
//! │  │ Engine         │  │                    │  │                    │    │
//! │  │ Live lookup or │  │ Drains sync_queue  │  │ Dismissable list + │    │
//! │  │ snapshot cache │  │ Bounded retries    │  │ broadcast channel  │    │
//! │  │ Debounced      │  │ Backoff schedule   │  │                    │    │
//! │  └───────┬────────┘  └─────────┬──────────┘  └────────────────────┘    │
//! │          │                     │                                        │
//! │          └──────────┬──────────┘                                        │
//! │                     ▼                                                   │
//! │          ┌─────────────────────┐      ┌──────────────────────────┐     │
//! │          │ ConnectivityMonitor │◄─────│ ConnectivityProbe        │     │
//! │          │ Debounced online /  │      │ (GET /health)            │     │
//! │          │ offline + quality   │      └──────────────────────────┘     │
//! │          └─────────────────────┘                                        │
//! │                                                                         │
//! │  PORTS (ports.rs)           ADAPTER (http.rs)                          │
//! │  • StockService             • HttpBackend (reqwest, JSON)              │
//! │  • SaleService                                                          │
//! │  • EventSink                                                            │
//! │  • ConnectivityProbe                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Pipeline configuration (terminal, backend, sync, timing)
//! - [`connectivity`] - Debounced online/offline tracking
//! - [`engine`] - Sync queue drain with bounded retries
//! - [`error`] - Pipeline error types
//! - [`http`] - HTTP adapter for the remote ports
//! - [`notifications`] - Operator notifications
//! - [`ports`] - Traits for the remote collaborators
//! - [`session`] - The per-terminal session
//! - [`stock`] - Live/cached stock validation
//!
//! ## Usage
//! ```rust,ignore
//! use std::sync::Arc;
//! use till_sync::{HttpBackend, PipelineConfig, PosSession};
//!
//! let config = PipelineConfig::load(None)?;
//! let backend = Arc::new(HttpBackend::from_config(&config)?);
//!
//! let session = PosSession::builder(config)
//!     .with_database(db)
//!     .with_stock_service(backend.clone())
//!     .with_sale_service(backend.clone())
//!     .with_probe(backend)
//!     .build()?;
//! session.start().await?;
//! ```

pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod http;
pub mod notifications;
pub mod ports;
pub mod session;
pub mod stock;

#[cfg(test)]
mod fakes;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::PipelineConfig;
pub use connectivity::{ConnectionQuality, ConnectivityEvent, ConnectivityMonitor, ConnectivityState};
pub use engine::{DrainReport, SyncEngine, SyncEvent, SyncStatus};
pub use error::{RemoteError, SyncError, SyncResult};
pub use http::HttpBackend;
pub use notifications::{Notification, NotificationCenter, NotificationKind};
pub use ports::{ConnectivityProbe, EventSink, NoOpSink, SaleService, StockService};
pub use session::{PosSession, PosSessionBuilder, SaleOutcome};
pub use stock::{CartValidation, StockValidationEngine};
