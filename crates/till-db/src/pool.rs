//! # Database Pool Management
//!
//! Connection pool creation plus the writes that must span two tables.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  Terminal startup                                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbConfig::new(path) ← Configure pool settings                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await ← Create pool + run migrations            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │            SqlitePool                    │                           │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐                │                           │
//! │  │  │Conn1│ │Conn2│ │Conn3│ ...            │  (max_connections)        │
//! │  │  └─────┘ └─────┘ └─────┘                │                           │
//! │  └─────────────────────────────────────────┘                           │
//! │       │                                                                 │
//! │       ├──► checkout: record_offline_sale (one transaction)             │
//! │       ├──► sync engine: confirm / retry / exhaust (one transaction)    │
//! │       └──► validation: stock snapshots                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! SQLite WAL mode lets the validation engine read snapshots while the sync
//! engine is writing queue updates.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::offline_sale::{self, OfflineSaleRepository};
use crate::repository::stock_snapshot::StockSnapshotRepository;
use crate::repository::sync_queue::{self, SyncQueueRepository};
use till_core::{OfflineSaleRecord, SyncOperation};

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/till.db")
///     .max_connections(5)
///     .min_connections(1);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5 (sufficient for a single terminal)
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection timeout duration.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Applies `TILL_DB_PATH` if set.
    pub fn with_env_override(mut self) -> Self {
        if let Ok(path) = std::env::var("TILL_DB_PATH") {
            if !path.trim().is_empty() {
                self.database_path = PathBuf::from(path);
            }
        }
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// A single connection that never idles out, so the in-memory database
    /// lives as long as the pool.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(3600),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing repository access.
///
/// Cloning is cheap (the pool is reference counted).
#[derive(Debug, Clone)]
pub struct Database {
    /// The SQLite connection pool.
    pool: SqlitePool,
}

impl Database {
    /// Creates a new database connection pool.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Configures SQLite:
    ///    - WAL mode for concurrent reads
    ///    - NORMAL synchronous (balance of safety/speed)
    ///    - Foreign keys enabled
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true);

        debug!("Connection options configured");

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout));

        // An in-memory database disappears with its last connection.
        if config.database_path.as_os_str() == ":memory:" {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let db = Database { pool };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the offline sale repository.
    pub fn offline_sales(&self) -> OfflineSaleRepository {
        OfflineSaleRepository::new(self.pool.clone())
    }

    /// Returns the sync queue repository.
    pub fn sync_queue(&self) -> SyncQueueRepository {
        SyncQueueRepository::new(self.pool.clone())
    }

    /// Returns the stock snapshot repository.
    pub fn stock_snapshots(&self) -> StockSnapshotRepository {
        StockSnapshotRepository::new(self.pool.clone())
    }

    // =========================================================================
    // Cross-table Transactions
    // =========================================================================

    /// Persists an offline sale and its queued operation atomically.
    ///
    /// ## Guarantee
    /// After `Ok(())` the record exists with exactly one queued operation.
    /// After `Err(_)` neither row exists.
    pub async fn record_offline_sale(
        &self,
        record: &OfflineSaleRecord,
        op: &SyncOperation,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        offline_sale::insert(&mut tx, record).await?;
        if !sync_queue::insert(&mut tx, op).await? {
            return Err(DbError::UniqueViolation {
                field: "sync_queue.id".to_string(),
            });
        }

        tx.commit().await?;

        info!(
            sale_id = %record.id,
            op_id = %op.id,
            total_cents = record.total_cents,
            "Offline sale recorded"
        );
        Ok(())
    }

    /// Server confirmed the sale: record `synced`, operation removed.
    pub async fn confirm_sale_sync(
        &self,
        op_id: &str,
        record_id: &str,
        server_sale_id: &str,
        synced_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        offline_sale::mark_synced(&mut tx, record_id, server_sale_id, synced_at).await?;
        sync_queue::remove(&mut tx, op_id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Retryable failure: record `failed` (non-terminal), operation
    /// rescheduled.
    pub async fn record_sale_retry(
        &self,
        op_id: &str,
        record_id: &str,
        retry_count: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        offline_sale::mark_failed(&mut tx, record_id, retry_count, error, false).await?;
        sync_queue::record_failure(&mut tx, op_id, retry_count, error, next_attempt_at).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Gave up: record terminal `failed`, operation `exhausted`.
    pub async fn exhaust_sale_sync(
        &self,
        op_id: &str,
        record_id: &str,
        retry_count: i64,
        error: &str,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        offline_sale::mark_failed(&mut tx, record_id, retry_count, error, true).await?;
        sync_queue::mark_exhausted(&mut tx, op_id, retry_count, error).await?;
        tx.commit().await?;

        warn!(sale_id = %record_id, op_id = %op_id, error, "Offline sale needs attention");
        Ok(())
    }

    /// Manual retry of a terminal failure: record back to `pending` and its
    /// operation re-queued with a fresh retry budget.
    pub async fn requeue_failed_sale(&self, record_id: &str) -> DbResult<OfflineSaleRecord> {
        let mut tx = self.pool.begin().await?;

        let record = offline_sale::get(&mut tx, record_id)
            .await?
            .ok_or_else(|| DbError::not_found("OfflineSale", record_id))?;
        if !record.needs_attention {
            return Err(DbError::InvalidTransition {
                id: record_id.to_string(),
                from: record.status.to_string(),
                to: "pending".to_string(),
            });
        }
        let op_id = record
            .sync_operation_id
            .clone()
            .ok_or_else(|| DbError::not_found("SyncOperation", record_id))?;

        offline_sale::requeue(&mut tx, record_id).await?;
        sync_queue::reset(&mut tx, &op_id).await?;

        let updated = offline_sale::get(&mut tx, record_id)
            .await?
            .ok_or_else(|| DbError::not_found("OfflineSale", record_id))?;
        tx.commit().await?;

        info!(sale_id = %record_id, op_id = %op_id, "Offline sale re-queued by operator");
        Ok(updated)
    }

    /// Deletes a synced or terminally failed record and its operation.
    pub async fn purge_offline_sale(&self, record_id: &str) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let record = offline_sale::get(&mut tx, record_id)
            .await?
            .ok_or_else(|| DbError::not_found("OfflineSale", record_id))?;
        if !record.is_terminal() {
            return Err(DbError::InvalidTransition {
                id: record_id.to_string(),
                from: record.status.to_string(),
                to: "purged".to_string(),
            });
        }

        if let Some(op_id) = &record.sync_operation_id {
            sync_queue::remove(&mut tx, op_id).await?;
        }
        offline_sale::delete(&mut tx, record_id).await?;
        tx.commit().await?;

        info!(sale_id = %record_id, "Offline sale purged");
        Ok(())
    }

    /// Closes the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database can execute queries.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
