//! Database schema creation for the option chain store.
//!
//! Provisioning is a separate step (see the `setup_db` binary); the writer
//! assumes these objects already exist.

use anyhow::Result;
use sqlx::PgConnection;

use crate::types::Underlying;

/// Per-underlying chain table DDL. Both tables share one column layout.
///
/// Append-only by design: no unique constraints, so re-inserting an identical
/// batch produces a second set of rows.
pub fn chain_table_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id SERIAL PRIMARY KEY,
            symbol VARCHAR(10),
            expiry_date VARCHAR(20),
            fetch_time TIMESTAMP,
            spot_price DECIMAL(10,2),
            atm_strike DECIMAL(10,2),
            strike_price DECIMAL(10,2),
            ce_oi BIGINT,
            ce_chg_in_oi BIGINT,
            ce_volume BIGINT,
            ce_iv DECIMAL(10,2),
            ce_ltp DECIMAL(10,2),
            ce_bid_qty BIGINT,
            ce_bid DECIMAL(10,2),
            ce_ask DECIMAL(10,2),
            ce_ask_qty BIGINT,
            ce_delta DECIMAL(10,4),
            ce_theta DECIMAL(10,4),
            ce_gamma DECIMAL(10,4),
            ce_vega DECIMAL(10,4),
            pe_bid_qty BIGINT,
            pe_bid DECIMAL(10,2),
            pe_ask DECIMAL(10,2),
            pe_ask_qty BIGINT,
            pe_ltp DECIMAL(10,2),
            pe_iv DECIMAL(10,2),
            pe_volume BIGINT,
            pe_chg_in_oi BIGINT,
            pe_oi BIGINT,
            pe_delta DECIMAL(10,4),
            pe_theta DECIMAL(10,4),
            pe_gamma DECIMAL(10,4),
            pe_vega DECIMAL(10,4),
            timestamp TIME,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )"
    )
}

/// Index DDL for range queries by expiry and capture minute.
pub fn index_ddl(underlying: Underlying) -> [String; 2] {
    let short = underlying.symbol().to_lowercase();
    let table = underlying.table();
    [
        format!("CREATE INDEX IF NOT EXISTS idx_{short}_expiry ON {table}(expiry_date)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{short}_timestamp ON {table}(timestamp)"),
    ]
}

/// Create the schema, both chain tables, and their indexes.
pub async fn create_schema(conn: &mut PgConnection) -> Result<()> {
    sqlx::query("CREATE SCHEMA IF NOT EXISTS option_chain")
        .execute(&mut *conn)
        .await?;

    for underlying in Underlying::ALL {
        sqlx::query(&chain_table_ddl(underlying.table()))
            .execute(&mut *conn)
            .await?;
        for stmt in index_ddl(underlying) {
            sqlx::query(&stmt).execute(&mut *conn).await?;
        }
    }

    Ok(())
}

/// List the tables present under the `option_chain` schema.
pub async fn list_tables(conn: &mut PgConnection) -> Result<Vec<String>> {
    let tables = sqlx::query_scalar::<_, String>(
        "SELECT table_name FROM information_schema.tables
         WHERE table_schema = 'option_chain' ORDER BY table_name",
    )
    .fetch_all(conn)
    .await?;
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{insert_columns, COLUMN_MAP};

    #[test]
    fn ddl_contains_every_mapped_column() {
        let ddl = chain_table_ddl(Underlying::Nifty.table());
        for (_, storage) in COLUMN_MAP {
            assert!(ddl.contains(storage), "missing column {storage}");
        }
        for column in insert_columns() {
            assert!(ddl.contains(column), "missing column {column}");
        }
    }

    #[test]
    fn ddl_has_no_unique_constraints() {
        let ddl = chain_table_ddl(Underlying::BankNifty.table());
        assert!(!ddl.to_uppercase().contains("UNIQUE"));
        assert!(!ddl.to_uppercase().contains("ON CONFLICT"));
    }

    #[test]
    fn index_names_are_per_underlying() {
        let [expiry, timestamp] = index_ddl(Underlying::BankNifty);
        assert!(expiry.contains("idx_banknifty_expiry"));
        assert!(timestamp.contains("idx_banknifty_timestamp"));
        assert!(expiry.contains("option_chain.banknifty_option_chain"));
    }
}
