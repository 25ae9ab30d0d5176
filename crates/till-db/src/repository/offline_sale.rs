//! # Offline Sale Repository
//!
//! Durable records of sales taken without server confirmation.
//!
//! ## Lifecycle Enforcement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every status write is a guarded UPDATE:                                │
//! │                                                                         │
//! │    UPDATE offline_sales SET status = <next>                            │
//! │    WHERE id = ? AND status IN (<states allowed to reach next>)         │
//! │                                                                         │
//! │  0 rows affected → the record is missing or the move is illegal.       │
//! │  A synced record can never be dragged back to pending or failed.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use till_core::{OfflineSaleRecord, OfflineSaleStatus, SaleItem};

const ALL_STATUSES: [OfflineSaleStatus; 4] = [
    OfflineSaleStatus::Pending,
    OfflineSaleStatus::Syncing,
    OfflineSaleStatus::Synced,
    OfflineSaleStatus::Failed,
];

const SELECT_COLUMNS: &str = r#"
    SELECT id, timestamp, items, customer_id, note, total_cents, status,
           retry_count, sync_operation_id, last_error, server_sale_id,
           synced_at, needs_attention
    FROM offline_sales
"#;

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct OfflineSaleRow {
    id: String,
    timestamp: DateTime<Utc>,
    items: String,
    customer_id: Option<String>,
    note: Option<String>,
    total_cents: i64,
    status: OfflineSaleStatus,
    retry_count: i64,
    sync_operation_id: Option<String>,
    last_error: Option<String>,
    server_sale_id: Option<String>,
    synced_at: Option<DateTime<Utc>>,
    needs_attention: bool,
}

impl TryFrom<OfflineSaleRow> for OfflineSaleRecord {
    type Error = DbError;

    fn try_from(row: OfflineSaleRow) -> Result<Self, Self::Error> {
        let items: Vec<SaleItem> = serde_json::from_str(&row.items)?;
        Ok(OfflineSaleRecord {
            id: row.id,
            timestamp: row.timestamp,
            items,
            customer_id: row.customer_id,
            note: row.note,
            total_cents: row.total_cents,
            status: row.status,
            retry_count: row.retry_count,
            sync_operation_id: row.sync_operation_id,
            last_error: row.last_error,
            server_sale_id: row.server_sale_id,
            synced_at: row.synced_at,
            needs_attention: row.needs_attention,
        })
    }
}

/// `'pending', 'failed'` style list of the states that may move to `next`.
fn allowed_predecessors(next: OfflineSaleStatus) -> String {
    ALL_STATUSES
        .iter()
        .filter(|s| s.can_transition_to(next))
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Connection-level Operations
// =============================================================================

pub(crate) async fn insert(conn: &mut SqliteConnection, record: &OfflineSaleRecord) -> DbResult<()> {
    let items = serde_json::to_string(&record.items)?;

    sqlx::query(
        r#"
        INSERT INTO offline_sales (
            id, timestamp, items, customer_id, note, total_cents, status,
            retry_count, sync_operation_id, last_error, server_sale_id,
            synced_at, needs_attention
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
    )
    .bind(&record.id)
    .bind(record.timestamp)
    .bind(items)
    .bind(&record.customer_id)
    .bind(&record.note)
    .bind(record.total_cents)
    .bind(record.status)
    .bind(record.retry_count)
    .bind(&record.sync_operation_id)
    .bind(&record.last_error)
    .bind(&record.server_sale_id)
    .bind(record.synced_at)
    .bind(record.needs_attention)
    .execute(conn)
    .await?;

    Ok(())
}

pub(crate) async fn get(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<OfflineSaleRecord>> {
    let row = sqlx::query_as::<_, OfflineSaleRow>(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(conn)
        .await?;

    row.map(OfflineSaleRecord::try_from).transpose()
}

/// Explains why a guarded update touched no row.
async fn transition_error(
    conn: &mut SqliteConnection,
    id: &str,
    next: OfflineSaleStatus,
) -> DbError {
    match get(conn, id).await {
        Ok(Some(record)) => DbError::InvalidTransition {
            id: id.to_string(),
            from: record.status.to_string(),
            to: next.to_string(),
        },
        Ok(None) => DbError::not_found("OfflineSale", id),
        Err(e) => e,
    }
}

pub(crate) async fn mark_syncing(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
    let next = OfflineSaleStatus::Syncing;
    let sql = format!(
        "UPDATE offline_sales SET status = ?2 WHERE id = ?1 AND status IN ({})",
        allowed_predecessors(next)
    );
    let result = sqlx::query(&sql).bind(id).bind(next).execute(&mut *conn).await?;

    if result.rows_affected() == 0 {
        return Err(transition_error(conn, id, next).await);
    }
    Ok(())
}

pub(crate) async fn mark_synced(
    conn: &mut SqliteConnection,
    id: &str,
    server_sale_id: &str,
    synced_at: DateTime<Utc>,
) -> DbResult<()> {
    let next = OfflineSaleStatus::Synced;
    let sql = format!(
        r#"
        UPDATE offline_sales SET
            status = ?2, server_sale_id = ?3, synced_at = ?4, last_error = NULL
        WHERE id = ?1 AND status IN ({})
        "#,
        allowed_predecessors(next)
    );
    let result = sqlx::query(&sql)
        .bind(id)
        .bind(next)
        .bind(server_sale_id)
        .bind(synced_at)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(transition_error(conn, id, next).await);
    }
    Ok(())
}

pub(crate) async fn mark_failed(
    conn: &mut SqliteConnection,
    id: &str,
    retry_count: i64,
    error: &str,
    needs_attention: bool,
) -> DbResult<()> {
    let next = OfflineSaleStatus::Failed;
    let sql = format!(
        r#"
        UPDATE offline_sales SET
            status = ?2, retry_count = ?3, last_error = ?4, needs_attention = ?5
        WHERE id = ?1 AND status IN ({})
        "#,
        allowed_predecessors(next)
    );
    let result = sqlx::query(&sql)
        .bind(id)
        .bind(next)
        .bind(retry_count)
        .bind(error)
        .bind(needs_attention)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(transition_error(conn, id, next).await);
    }
    Ok(())
}

pub(crate) async fn requeue(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
    let next = OfflineSaleStatus::Pending;
    let sql = format!(
        r#"
        UPDATE offline_sales SET
            status = ?2, retry_count = 0, last_error = NULL, needs_attention = 0
        WHERE id = ?1 AND status IN ({})
        "#,
        allowed_predecessors(next)
    );
    let result = sqlx::query(&sql).bind(id).bind(next).execute(&mut *conn).await?;

    if result.rows_affected() == 0 {
        return Err(transition_error(conn, id, next).await);
    }
    Ok(())
}

pub(crate) async fn delete(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM offline_sales WHERE id = ?1")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for offline sale records.
#[derive(Debug, Clone)]
pub struct OfflineSaleRepository {
    pool: SqlitePool,
}

impl OfflineSaleRepository {
    /// Creates a new OfflineSaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OfflineSaleRepository { pool }
    }

    /// Inserts a record on its own.
    ///
    /// Checkout uses [`crate::Database::record_offline_sale`] instead, which
    /// writes the record and its queued operation together.
    pub async fn insert(&self, record: &OfflineSaleRecord) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert(&mut conn, record).await
    }

    /// Gets a record by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<OfflineSaleRecord>> {
        let mut conn = self.pool.acquire().await?;
        get(&mut conn, id).await
    }

    /// All records, newest first.
    pub async fn list(&self) -> DbResult<Vec<OfflineSaleRecord>> {
        let rows = sqlx::query_as::<_, OfflineSaleRow>(&format!(
            "{SELECT_COLUMNS} ORDER BY timestamp DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OfflineSaleRecord::try_from).collect()
    }

    /// Number of records with a given status.
    pub async fn count_by_status(&self, status: OfflineSaleStatus) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM offline_sales WHERE status = ?1")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Number of terminal failures waiting for an operator.
    pub async fn count_needing_attention(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM offline_sales WHERE needs_attention = 1")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// `pending | failed → syncing`.
    pub async fn mark_syncing(&self, id: &str) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        mark_syncing(&mut conn, id).await
    }

    /// `syncing → failed`. `needs_attention` makes the failure terminal.
    pub async fn mark_failed(
        &self,
        id: &str,
        retry_count: i64,
        error: &str,
        needs_attention: bool,
    ) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        mark_failed(&mut conn, id, retry_count, error, needs_attention).await
    }

    /// Puts records left in `syncing` by a crash back to `pending`.
    pub async fn recover_interrupted(&self) -> DbResult<u64> {
        let result = sqlx::query("UPDATE offline_sales SET status = ?1 WHERE status = ?2")
            .bind(OfflineSaleStatus::Pending)
            .bind(OfflineSaleStatus::Syncing)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            debug!(count = result.rows_affected(), "Recovered interrupted offline sales");
        }
        Ok(result.rows_affected())
    }

    /// Deletes synced records confirmed before `cutoff`.
    pub async fn purge_synced_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result =
            sqlx::query("DELETE FROM offline_sales WHERE status = ?1 AND synced_at < ?2")
                .bind(OfflineSaleStatus::Synced)
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;
    use till_core::{CartLine, SalePayload};

    async fn setup() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn record() -> OfflineSaleRecord {
        let payload = SalePayload::from_lines(
            "till-1",
            &[CartLine::new("a", "Product A", 3, 250, 5)],
            None,
            Some("table 4".to_string()),
        );
        OfflineSaleRecord::pending(&payload, "op-1")
    }

    #[tokio::test]
    async fn test_insert_and_get_round_trips_items() {
        let db = setup().await;
        let repo = db.offline_sales();
        let rec = record();

        repo.insert(&rec).await.unwrap();
        let loaded = repo.get(&rec.id).await.unwrap().unwrap();

        assert_eq!(loaded.items, rec.items);
        assert_eq!(loaded.note.as_deref(), Some("table 4"));
        assert_eq!(loaded.status, OfflineSaleStatus::Pending);
        assert!(!loaded.needs_attention);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let db = setup().await;
        let repo = db.offline_sales();
        let rec = record();

        repo.insert(&rec).await.unwrap();
        assert!(matches!(
            repo.insert(&rec).await,
            Err(DbError::UniqueViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_guarded_transitions() {
        let db = setup().await;
        let repo = db.offline_sales();
        let rec = record();
        repo.insert(&rec).await.unwrap();

        // pending → failed skips syncing
        assert!(matches!(
            repo.mark_failed(&rec.id, 1, "boom", false).await,
            Err(DbError::InvalidTransition { .. })
        ));

        repo.mark_syncing(&rec.id).await.unwrap();
        repo.mark_failed(&rec.id, 1, "timeout", false).await.unwrap();
        repo.mark_syncing(&rec.id).await.unwrap();

        let loaded = repo.get(&rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OfflineSaleStatus::Syncing);
        assert_eq!(loaded.retry_count, 1);
        assert_eq!(loaded.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let db = setup().await;
        assert!(matches!(
            db.offline_sales().mark_syncing("nope").await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let db = setup().await;
        let repo = db.offline_sales();
        let rec = record();
        repo.insert(&rec).await.unwrap();
        repo.mark_syncing(&rec.id).await.unwrap();

        assert_eq!(repo.recover_interrupted().await.unwrap(), 1);
        assert_eq!(
            repo.count_by_status(OfflineSaleStatus::Pending).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_purge_only_old_synced() {
        let db = setup().await;
        let repo = db.offline_sales();

        let mut old = record();
        old.status = OfflineSaleStatus::Synced;
        old.synced_at = Some(Utc::now() - Duration::days(40));
        repo.insert(&old).await.unwrap();

        let mut fresh = record();
        fresh.status = OfflineSaleStatus::Synced;
        fresh.synced_at = Some(Utc::now());
        repo.insert(&fresh).await.unwrap();

        let pending = record();
        repo.insert(&pending).await.unwrap();

        let purged = repo
            .purge_synced_before(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(repo.get(&old.id).await.unwrap().is_none());
        assert_eq!(repo.list().await.unwrap().len(), 2);
    }
}
