//! Cycle driver: the market-hours collection loop.
//!
//! An explicit state machine stepped one transition at a time so tests can
//! drive it with a manual clock. No two cycles overlap; the driver never
//! starts a fetch before the previous cycle's sleep completes.

use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDateTime;
use tracing::{error, info};

use crate::clock::{market_phase, next_tick, Clock, MarketPhase};
use crate::config::ERROR_BACKOFF_SECS;
use crate::dhan::MarketData;
use crate::fetcher::SnapshotFetcher;
use crate::shutdown::Shutdown;
use crate::storage::SnapshotSink;
use crate::types::Underlying;

/// Driver states. A completed cycle is Fetching followed by IdleUntilNextTick;
/// ErrorBackoff is entered only when an error escapes the fetching phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    WaitingForClock,
    Fetching,
    IdleUntilNextTick,
    ErrorBackoff,
}

pub struct CycleDriver<C, M, S> {
    clock: C,
    market: M,
    sink: S,
    shutdown: Shutdown,
}

impl<C: Clock, M: MarketData, S: SnapshotSink> CycleDriver<C, M, S> {
    pub fn new(clock: C, market: M, sink: S, shutdown: Shutdown) -> Self {
        Self {
            clock,
            market,
            sink,
            shutdown,
        }
    }

    /// Run until shutdown is requested.
    pub async fn run(&mut self) {
        info!("Starting option chain data collection...");
        let mut state = DriverState::WaitingForClock;
        while let Some(next) = self.step(state).await {
            state = next;
        }
        info!("Stopping data collection...");
    }

    /// Execute one state transition. Returns `None` once shutdown is observed.
    pub async fn step(&mut self, state: DriverState) -> Option<DriverState> {
        if self.shutdown.is_triggered() {
            return None;
        }

        match state {
            DriverState::WaitingForClock => self.check_clock().await,
            DriverState::Fetching => {
                let started = self.clock.now();
                match self.run_cycle().await {
                    Ok(()) => {
                        let elapsed = (self.clock.now() - started).num_milliseconds() as f64 / 1000.0;
                        info!("Cycle completed in {:.2} seconds", elapsed);
                        Some(DriverState::IdleUntilNextTick)
                    }
                    Err(e) => {
                        error!("Error in collection cycle: {:#}", e);
                        Some(DriverState::ErrorBackoff)
                    }
                }
            }
            DriverState::IdleUntilNextTick => {
                let next = next_tick(self.clock.now());
                self.sleep_until(next).await?;
                Some(DriverState::WaitingForClock)
            }
            DriverState::ErrorBackoff => {
                info!(
                    "Backing off for {} seconds before resuming...",
                    ERROR_BACKOFF_SECS
                );
                self.sleep_for(Duration::from_secs(ERROR_BACKOFF_SECS)).await?;
                Some(DriverState::WaitingForClock)
            }
        }
    }

    async fn check_clock(&mut self) -> Option<DriverState> {
        let now = self.clock.now();
        match market_phase(now) {
            MarketPhase::Open => {
                info!("Starting new cycle at: {}", now.format("%H:%M:%S"));
                Some(DriverState::Fetching)
            }
            MarketPhase::BeforeOpen { next_check } => {
                info!(
                    "Market not open yet. Sleeping until market open: {}",
                    next_check.format("%H:%M:%S")
                );
                self.sleep_until(next_check).await?;
                Some(DriverState::WaitingForClock)
            }
            MarketPhase::AfterClose { next_check } => {
                info!(
                    "Market closed for today. Sleeping until next trading day: {}",
                    next_check.format("%Y-%m-%d %H:%M:%S")
                );
                self.sleep_until(next_check).await?;
                Some(DriverState::WaitingForClock)
            }
            MarketPhase::Weekend { next_check } => {
                info!("Market closed: Weekend - {}", now.format("%H:%M:%S"));
                info!(
                    "Sleeping until next trading day: {}",
                    next_check.format("%Y-%m-%d %H:%M:%S")
                );
                self.sleep_until(next_check).await?;
                Some(DriverState::WaitingForClock)
            }
        }
    }

    /// One full fetch-and-write pass over every underlying, in fixed priority
    /// order. One underlying's failure never blocks the other.
    async fn run_cycle(&self) -> Result<()> {
        for underlying in Underlying::ALL {
            info!("Fetching {} option chain data...", underlying);
            let fetcher = SnapshotFetcher::new(&self.market, &self.clock);
            match fetcher.fetch(underlying).await {
                Ok(batches) => {
                    for batch in batches {
                        match self.sink.write(&batch).await {
                            Ok(rows) => info!(
                                "Data saved for {} expiry: {} ({} rows)",
                                underlying, batch.expiry_date, rows
                            ),
                            Err(e) => error!(
                                "Error saving {} expiry {}: {:#}",
                                underlying, batch.expiry_date, e
                            ),
                        }
                    }
                }
                Err(e) => error!("Error processing {}: {:#}", underlying, e),
            }
        }
        Ok(())
    }

    async fn sleep_until(&mut self, target: NaiveDateTime) -> Option<()> {
        let now = self.clock.now();
        let duration = (target - now).to_std().unwrap_or(Duration::ZERO);
        self.sleep_for(duration).await
    }

    /// Race the sleep against shutdown; `None` means shutdown won.
    async fn sleep_for(&mut self, duration: Duration) -> Option<()> {
        tokio::select! {
            _ = self.shutdown.wait() => None,
            _ = self.clock.sleep(duration) => Some(()),
        }
    }
}
