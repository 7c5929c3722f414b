//! One-time database provisioning for the option chain store.
//!
//! Creates the `option_chain` schema, both per-underlying tables, and their
//! indexes, then lists the tables for verification. The collector itself
//! assumes these objects exist.

use anyhow::{Context, Result};
use sqlx::{Connection, PgConnection};
use tracing::info;

use chain_collector::config;
use chain_collector::storage::schema::{create_schema, list_tables};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    dotenvy::dotenv().ok();
    let database_url = config::database_url()?;

    info!("Connecting to database...");
    let mut conn = PgConnection::connect(&database_url)
        .await
        .context("failed to connect to database")?;

    info!("Creating schema and tables...");
    create_schema(&mut conn).await?;

    let tables = list_tables(&mut conn).await?;
    info!("Database setup completed successfully!");
    info!("Created tables:");
    for table in tables {
        info!("- {}", table);
    }

    conn.close().await?;
    Ok(())
}
