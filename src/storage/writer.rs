//! Postgres snapshot writer: one connection and one transaction per batch.
//!
//! A batch is inserted all-or-nothing; any row failure aborts the transaction
//! and the whole batch is rolled back. The destination schema is assumed to be
//! pre-provisioned and missing objects surface as loud insert errors.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tracing::info;

use super::types::insert_columns;
use crate::types::CaptureBatch;

/// Destination for capture batches. The cycle driver only sees this trait, so
/// tests can swap in an in-memory sink.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Persist one batch atomically, returning the row count written.
    async fn write(&self, batch: &CaptureBatch) -> Result<u64>;
}

/// Writer that opens a fresh connection per write. No pooling: the collector
/// writes at most a handful of batches per minute.
pub struct SnapshotWriter {
    database_url: String,
}

impl SnapshotWriter {
    pub fn new(database_url: String) -> Self {
        Self { database_url }
    }
}

#[async_trait]
impl SnapshotSink for SnapshotWriter {
    async fn write(&self, batch: &CaptureBatch) -> Result<u64> {
        if batch.rows.is_empty() {
            return Ok(0);
        }

        let mut conn = PgConnection::connect(&self.database_url)
            .await
            .context("failed to connect to database")?;
        let mut tx = conn.begin().await?;

        let table = batch.underlying.table();
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) ",
            table,
            insert_columns().join(", ")
        ));

        // Bind order mirrors insert_columns(); see storage::types tests.
        builder.push_values(batch.rows.iter(), |mut b, row| {
            b.push_bind(batch.underlying.symbol())
                .push_bind(&batch.expiry_date)
                .push_bind(batch.fetch_time)
                .push_bind(batch.spot_price)
                .push_bind(batch.atm_strike)
                .push_bind(row.strike_price)
                .push_bind(row.ce_oi)
                .push_bind(row.ce_chg_in_oi)
                .push_bind(row.ce_volume)
                .push_bind(row.ce_iv)
                .push_bind(row.ce_ltp)
                .push_bind(row.ce_bid_qty)
                .push_bind(row.ce_bid)
                .push_bind(row.ce_ask)
                .push_bind(row.ce_ask_qty)
                .push_bind(row.ce_delta)
                .push_bind(row.ce_theta)
                .push_bind(row.ce_gamma)
                .push_bind(row.ce_vega)
                .push_bind(row.pe_bid_qty)
                .push_bind(row.pe_bid)
                .push_bind(row.pe_ask)
                .push_bind(row.pe_ask_qty)
                .push_bind(row.pe_ltp)
                .push_bind(row.pe_iv)
                .push_bind(row.pe_volume)
                .push_bind(row.pe_chg_in_oi)
                .push_bind(row.pe_oi)
                .push_bind(row.pe_delta)
                .push_bind(row.pe_theta)
                .push_bind(row.pe_gamma)
                .push_bind(row.pe_vega)
                .push_bind(batch.timestamp);
        });

        let result = builder
            .build()
            .execute(&mut *tx)
            .await
            .with_context(|| format!("bulk insert into {} failed", table))?;
        tx.commit().await?;

        let rows = result.rows_affected();
        info!(
            "[DB] Inserted {} rows into {} for expiry {}",
            rows, table, batch.expiry_date
        );
        Ok(rows)
    }
}
