//! System configuration constants and environment variable parsing.
//!
//! This module contains the market session thresholds, per-cycle timing
//! constants, and environment-backed settings for the collector.

use anyhow::{Context, Result};

/// Dhan REST API base URL
pub const DHAN_API_BASE: &str = "https://api.dhan.co";

/// Market open threshold, local time (hour, minute, second)
pub const MARKET_OPEN_HMS: (u32, u32, u32) = (9, 15, 2);

/// Market close threshold, local time (hour, minute, second)
pub const MARKET_CLOSE_HMS: (u32, u32, u32) = (15, 30, 0);

/// Seconds past the minute boundary at which each cycle starts
pub const CYCLE_SECOND_OFFSET: u32 = 2;

/// Number of strikes requested per option chain fetch
pub const CHAIN_STRIKE_COUNT: usize = 50;

/// Pacing delay between consecutive broker requests (milliseconds)
pub const PACING_DELAY_MS: u64 = 100;

/// Sleep after an unexpected cycle failure before resuming (seconds)
pub const ERROR_BACKOFF_SECS: u64 = 60;

/// HTTP request timeout for broker calls (seconds)
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// Rotating log file name
pub const LOG_FILE: &str = "option_chain.log";

/// Base directory for on-disk snapshot artifacts
pub const DATA_DIR: &str = "option_chain_data";

/// Dhan API credentials read from the environment.
#[derive(Debug, Clone)]
pub struct DhanCredentials {
    pub client_code: String,
    pub token_id: String,
}

impl DhanCredentials {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            client_code: std::env::var("DHAN_CLIENT_CODE")
                .context("DHAN_CLIENT_CODE not set")?,
            token_id: std::env::var("DHAN_TOKEN_ID").context("DHAN_TOKEN_ID not set")?,
        })
    }
}

/// Build the Postgres connection URL from the `DB_*` environment variables.
pub fn database_url() -> Result<String> {
    let name = std::env::var("DB_NAME").context("DB_NAME not set")?;
    let user = std::env::var("DB_USER").context("DB_USER not set")?;
    let password = std::env::var("DB_PASSWORD").context("DB_PASSWORD not set")?;
    let host = std::env::var("DB_HOST").context("DB_HOST not set")?;
    let port = std::env::var("DB_PORT").context("DB_PORT not set")?;

    Ok(format!(
        "postgres://{}:{}@{}:{}/{}",
        user, password, host, port, name
    ))
}
