//! # Stock Snapshot Repository
//!
//! Last-known availability per product. Written after every successful live
//! lookup, read when the terminal validates offline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use till_core::StockSnapshot;

#[derive(Debug, sqlx::FromRow)]
struct StockSnapshotRow {
    product_id: String,
    available: i64,
    updated_at: DateTime<Utc>,
}

impl From<StockSnapshotRow> for StockSnapshot {
    fn from(row: StockSnapshotRow) -> Self {
        StockSnapshot {
            product_id: row.product_id,
            available: row.available,
            updated_at: row.updated_at,
        }
    }
}

/// Repository for cached stock snapshots.
#[derive(Debug, Clone)]
pub struct StockSnapshotRepository {
    pool: SqlitePool,
}

impl StockSnapshotRepository {
    /// Creates a new StockSnapshotRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockSnapshotRepository { pool }
    }

    /// Stores a batch of availabilities observed at `observed_at`.
    ///
    /// Older observations never overwrite newer ones.
    pub async fn upsert_many(
        &self,
        availability: &HashMap<String, i64>,
        observed_at: DateTime<Utc>,
    ) -> DbResult<()> {
        if availability.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for (product_id, available) in availability {
            sqlx::query(
                r#"
                INSERT INTO stock_snapshots (product_id, available, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT (product_id) DO UPDATE SET
                    available = excluded.available,
                    updated_at = excluded.updated_at
                WHERE excluded.updated_at >= stock_snapshots.updated_at
                "#,
            )
            .bind(product_id)
            .bind(available)
            .bind(observed_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = availability.len(), "Stock snapshots refreshed");
        Ok(())
    }

    /// Snapshots for the given products. Unknown products are skipped.
    pub async fn get_many(&self, product_ids: &[String]) -> DbResult<Vec<StockSnapshot>> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT product_id, available, updated_at FROM stock_snapshots WHERE product_id IN (",
        );
        let mut separated = query.separated(", ");
        for id in product_ids {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(")");

        let rows = query
            .build_query_as::<StockSnapshotRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(StockSnapshot::from).collect())
    }

    /// Snapshot of one product.
    pub async fn get(&self, product_id: &str) -> DbResult<Option<StockSnapshot>> {
        let row = sqlx::query_as::<_, StockSnapshotRow>(
            "SELECT product_id, available, updated_at FROM stock_snapshots WHERE product_id = ?1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(StockSnapshot::from))
    }

    /// Number of products with a snapshot.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock_snapshots")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
