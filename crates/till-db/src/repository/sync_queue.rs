//! # Sync Queue Repository
//!
//! Durable queue of operations waiting to reach the server.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  OFFLINE CHECKOUT                                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │  1. INSERT INTO offline_sales (..., status = 'pending')        │   │
//! │  │  2. INSERT OR IGNORE INTO sync_queue (id, payload, ...)        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← both rows or neither                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SYNC ENGINE DRAIN                                              │   │
//! │  │  SELECT ... WHERE status = 'queued'                             │   │
//! │  │  ORDER BY priority DESC, created_at ASC                         │   │
//! │  │    success    → DELETE row                                      │   │
//! │  │    retryable  → retry_count += 1, next_attempt_at = backoff     │   │
//! │  │    exhausted  → status = 'exhausted' (kept for the operator)    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Idempotent Enqueue
//! The operation id is the primary key and inserts use `INSERT OR IGNORE`,
//! so enqueuing the same operation twice leaves one row.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use till_core::{OperationKind, OperationStatus, SyncOperation};

const SELECT_COLUMNS: &str = r#"
    SELECT id, kind, entity, entity_id, payload, priority, retry_count,
           status, last_error, created_at, next_attempt_at
    FROM sync_queue
"#;

const DRAIN_ORDER: &str = "ORDER BY priority DESC, created_at ASC, rowid ASC";

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct SyncOperationRow {
    id: String,
    kind: OperationKind,
    entity: String,
    entity_id: String,
    payload: String,
    priority: i64,
    retry_count: i64,
    status: OperationStatus,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    next_attempt_at: Option<DateTime<Utc>>,
}

impl TryFrom<SyncOperationRow> for SyncOperation {
    type Error = DbError;

    fn try_from(row: SyncOperationRow) -> Result<Self, Self::Error> {
        Ok(SyncOperation {
            id: row.id,
            kind: row.kind,
            entity: row.entity,
            entity_id: row.entity_id,
            payload: serde_json::from_str(&row.payload)?,
            priority: row.priority,
            retry_count: row.retry_count,
            status: row.status,
            last_error: row.last_error,
            created_at: row.created_at,
            next_attempt_at: row.next_attempt_at,
        })
    }
}

// =============================================================================
// Connection-level Operations
// =============================================================================

/// Inserts unless the id is already queued. Returns whether a row was added.
pub(crate) async fn insert(conn: &mut SqliteConnection, op: &SyncOperation) -> DbResult<bool> {
    let payload = serde_json::to_string(&op.payload)?;

    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO sync_queue (
            id, kind, entity, entity_id, payload, priority, retry_count,
            status, last_error, created_at, next_attempt_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&op.id)
    .bind(op.kind)
    .bind(&op.entity)
    .bind(&op.entity_id)
    .bind(payload)
    .bind(op.priority)
    .bind(op.retry_count)
    .bind(op.status)
    .bind(&op.last_error)
    .bind(op.created_at)
    .bind(op.next_attempt_at)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn remove(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn record_failure(
    conn: &mut SqliteConnection,
    id: &str,
    retry_count: i64,
    error: &str,
    next_attempt_at: DateTime<Utc>,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE sync_queue SET
            retry_count = ?2, last_error = ?3, next_attempt_at = ?4
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(retry_count)
    .bind(error)
    .bind(next_attempt_at)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("SyncOperation", id));
    }
    Ok(())
}

pub(crate) async fn mark_exhausted(
    conn: &mut SqliteConnection,
    id: &str,
    retry_count: i64,
    error: &str,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE sync_queue SET
            status = ?2, retry_count = ?3, last_error = ?4, next_attempt_at = NULL
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(OperationStatus::Exhausted)
    .bind(retry_count)
    .bind(error)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("SyncOperation", id));
    }
    Ok(())
}

pub(crate) async fn reset(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE sync_queue SET
            status = ?2, retry_count = 0, last_error = NULL, next_attempt_at = NULL
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(OperationStatus::Queued)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("SyncOperation", id));
    }
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the sync queue.
#[derive(Debug, Clone)]
pub struct SyncQueueRepository {
    pool: SqlitePool,
}

impl SyncQueueRepository {
    /// Creates a new SyncQueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncQueueRepository { pool }
    }

    /// Enqueues an operation. Returns `false` if the id was already present.
    pub async fn enqueue(&self, op: &SyncOperation) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        let inserted = insert(&mut conn, op).await?;

        debug!(
            op_id = %op.id,
            entity = %op.entity,
            entity_id = %op.entity_id,
            inserted,
            "Enqueued sync operation"
        );
        Ok(inserted)
    }

    /// Gets an operation by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<SyncOperation>> {
        let row = sqlx::query_as::<_, SyncOperationRow>(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SyncOperation::try_from).transpose()
    }

    /// Queued operations in drain order, due or not.
    pub async fn queued(&self, limit: i64) -> DbResult<Vec<SyncOperation>> {
        let rows = sqlx::query_as::<_, SyncOperationRow>(&format!(
            "{SELECT_COLUMNS} WHERE status = ?1 {DRAIN_ORDER} LIMIT ?2"
        ))
        .bind(OperationStatus::Queued)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncOperation::try_from).collect()
    }

    /// Every operation, queued first, then exhausted.
    pub async fn list(&self) -> DbResult<Vec<SyncOperation>> {
        let rows = sqlx::query_as::<_, SyncOperationRow>(&format!(
            "{SELECT_COLUMNS} ORDER BY status DESC, priority DESC, created_at ASC, rowid ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncOperation::try_from).collect()
    }

    /// Records a retryable failure and the next allowed attempt time.
    pub async fn record_failure(
        &self,
        id: &str,
        retry_count: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        record_failure(&mut conn, id, retry_count, error, next_attempt_at).await
    }

    /// Marks an operation as given up.
    pub async fn mark_exhausted(&self, id: &str, retry_count: i64, error: &str) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        mark_exhausted(&mut conn, id, retry_count, error).await
    }

    /// Removes a delivered operation.
    pub async fn remove(&self, id: &str) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        remove(&mut conn, id).await
    }

    /// Number of operations still waiting for delivery.
    pub async fn count_queued(&self) -> DbResult<i64> {
        self.count_with_status(OperationStatus::Queued).await
    }

    /// Number of operations given up on.
    pub async fn count_exhausted(&self) -> DbResult<i64> {
        self.count_with_status(OperationStatus::Exhausted).await
    }

    async fn count_with_status(&self, status: OperationStatus) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue WHERE status = ?1")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
