//! Option chain collector daemon.
//!
//! Long-lived foreground process: checks the market clock, captures NIFTY and
//! BANKNIFTY option chain snapshots once per minute while the market is open,
//! and appends them to Postgres. SIGINT/SIGTERM exit cleanly between cycles.

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use chain_collector::clock::SystemClock;
use chain_collector::collector::CycleDriver;
use chain_collector::config::{self, DhanCredentials};
use chain_collector::dhan::DhanClient;
use chain_collector::shutdown::{listen_for_signals, Shutdown};
use chain_collector::storage::SnapshotWriter;
use chain_collector::types::Underlying;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with both stdout and file output
    let file_appender = tracing_appender::rolling::daily(".", config::LOG_FILE);
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        "chain_collector=info"
            .parse()
            .context("invalid log directive")?,
    );

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("🚀 Option Chain Collector");
    info!("   Underlyings: NIFTY (6 expiries), BANKNIFTY (3 expiries)");
    info!(
        "   Cadence: every minute at :{:02} during market hours",
        config::CYCLE_SECOND_OFFSET
    );

    dotenvy::dotenv().ok();
    let creds = DhanCredentials::from_env()?;
    let database_url = config::database_url()?;

    create_data_directories()?;

    let client = DhanClient::new(creds);
    let writer = SnapshotWriter::new(database_url);

    let (handle, shutdown) = Shutdown::new();
    tokio::spawn(listen_for_signals(handle));

    let mut driver = CycleDriver::new(SystemClock, client, writer, shutdown);
    driver.run().await;

    Ok(())
}

/// Create the on-disk snapshot directories (idempotent).
fn create_data_directories() -> Result<()> {
    for underlying in Underlying::ALL {
        let dir = std::path::Path::new(config::DATA_DIR).join(underlying.symbol());
        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            info!("Created directory: {}", dir.display());
        }
    }
    Ok(())
}
