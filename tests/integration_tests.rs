// tests/integration_tests.rs
// Holistic integration tests for the option chain collector
//
// These tests verify the full flow:
// 1. Snapshot fetching with fallback and per-slot failure containment
// 2. Batch stamping (spot, ATM strike, floored-minute timestamp)
// 3. Cycle driver state machine against a manual clock (no real sleeps)
// 4. Failure isolation between underlyings

mod support {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::NaiveDateTime;

    use chain_collector::clock::Clock;
    use chain_collector::dhan::{AtmQuote, ChainMeta, ChainStrike, MarketData, SideQuote};
    use chain_collector::storage::SnapshotSink;
    use chain_collector::types::{CaptureBatch, Underlying};

    /// Manual clock: sleeps advance the current time instantly.
    pub struct ManualClock {
        now: Mutex<NaiveDateTime>,
    }

    impl ManualClock {
        pub fn new(start: NaiveDateTime) -> Self {
            Self {
                now: Mutex::new(start),
            }
        }
    }

    #[async_trait]
    impl Clock for ManualClock {
        fn now(&self) -> NaiveDateTime {
            *self.now.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += chrono::Duration::from_std(duration).unwrap();
        }
    }

    /// Scriptable market-data collaborator.
    pub struct MockMarket {
        pub spot_nifty: Option<f64>,
        pub spot_banknifty: Option<f64>,
        pub fail_atm: bool,
        pub failed_chain_slots: Vec<usize>,
    }

    impl MockMarket {
        pub fn healthy() -> Self {
            Self {
                spot_nifty: Some(24_713.0),
                spot_banknifty: Some(51_482.0),
                fail_atm: false,
                failed_chain_slots: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl MarketData for MockMarket {
        async fn spot_price(&self, underlying: Underlying) -> Result<Option<f64>> {
            Ok(match underlying {
                Underlying::Nifty => self.spot_nifty,
                Underlying::BankNifty => self.spot_banknifty,
            })
        }

        async fn select_atm(&self, underlying: Underlying, _expiry_slot: usize) -> Result<AtmQuote> {
            if self.fail_atm {
                bail!("ATM selection unavailable");
            }
            let atm_strike = match underlying {
                Underlying::Nifty => 24_700.0,
                Underlying::BankNifty => 51_500.0,
            };
            Ok(AtmQuote {
                call_label: format!("{} 14 AUG {} CALL", underlying.symbol(), atm_strike as i64),
                put_label: format!("{} 14 AUG {} PUT", underlying.symbol(), atm_strike as i64),
                atm_strike,
            })
        }

        async fn option_chain(
            &self,
            underlying: Underlying,
            _exchange: &str,
            expiry_slot: usize,
            _strike_count: usize,
        ) -> Result<(ChainMeta, Vec<ChainStrike>)> {
            if self.failed_chain_slots.contains(&expiry_slot) {
                bail!("malformed option chain response");
            }
            let rows = (0..5)
                .map(|i| ChainStrike {
                    strike: 24_500.0 + 100.0 * i as f64,
                    call: SideQuote {
                        oi: 1_000 + i,
                        ltp: 52.5,
                        ..Default::default()
                    },
                    put: SideQuote {
                        oi: 900 + i,
                        ltp: 47.5,
                        ..Default::default()
                    },
                })
                .collect();
            let meta = ChainMeta {
                symbol: underlying.symbol().to_string(),
                expiry: "2025-08-14".to_string(),
                underlying_price: 24_713.0,
            };
            Ok((meta, rows))
        }
    }

    /// In-memory sink; optionally fails every write for one underlying.
    #[derive(Clone, Default)]
    pub struct MemorySink {
        pub written: Arc<Mutex<Vec<CaptureBatch>>>,
        pub fail_for: Option<Underlying>,
    }

    #[async_trait]
    impl SnapshotSink for MemorySink {
        async fn write(&self, batch: &CaptureBatch) -> Result<u64> {
            if self.fail_for == Some(batch.underlying) {
                bail!("insert failed");
            }
            let rows = batch.rows.len() as u64;
            self.written.lock().unwrap().push(batch.clone());
            Ok(rows)
        }
    }

    pub fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }
}

// ============================================================================
// FETCHER TESTS - Fallbacks, slot containment, batch stamping
// ============================================================================

mod fetcher_tests {
    use super::support::*;
    use chain_collector::fetcher::SnapshotFetcher;
    use chain_collector::types::{Provenance, Underlying};
    use rust_decimal::Decimal;

    /// Test: ATM selection failure falls back to spot rounded per underlying
    #[tokio::test]
    async fn atm_fallback_rounds_spot_per_underlying() {
        let market = MockMarket {
            fail_atm: true,
            ..MockMarket::healthy()
        };
        let clock = ManualClock::new(at(2025, 8, 4, 10, 31, 0));
        let fetcher = SnapshotFetcher::new(&market, &clock);

        let nifty = fetcher.fetch(Underlying::Nifty).await.unwrap();
        assert_eq!(nifty.len(), 6);
        for batch in &nifty {
            // 24,713 rounded to the nearest 100
            assert_eq!(batch.atm_strike, Decimal::new(2_470_000, 2));
            assert_eq!(batch.atm_source, Provenance::Derived);
            assert_eq!(batch.expiry_source, Provenance::Derived);
        }

        let banknifty = fetcher.fetch(Underlying::BankNifty).await.unwrap();
        assert_eq!(banknifty.len(), 3);
        for batch in &banknifty {
            // 51,482 rounded to the nearest 1000
            assert_eq!(batch.atm_strike, Decimal::new(5_100_000, 2));
            assert_eq!(batch.atm_source, Provenance::Derived);
        }
    }

    /// Test: broker-quoted selections keep their provenance and parsed expiry
    #[tokio::test]
    async fn broker_selection_parses_expiry_from_label() {
        let market = MockMarket::healthy();
        let clock = ManualClock::new(at(2025, 8, 4, 10, 31, 0));
        let fetcher = SnapshotFetcher::new(&market, &clock);

        let batches = fetcher.fetch(Underlying::Nifty).await.unwrap();
        for batch in &batches {
            assert_eq!(batch.expiry_date, "14 AUG");
            assert_eq!(batch.expiry_source, Provenance::Broker);
            assert_eq!(batch.atm_source, Provenance::Broker);
            assert_eq!(batch.spot_price, Decimal::new(2_471_300, 2));
        }
    }

    /// Test: a failed slot is absent, not null-padded; later slots continue
    #[tokio::test]
    async fn failed_slot_is_skipped_not_padded() {
        let market = MockMarket {
            failed_chain_slots: vec![2],
            ..MockMarket::healthy()
        };
        let clock = ManualClock::new(at(2025, 8, 4, 10, 31, 0));
        let fetcher = SnapshotFetcher::new(&market, &clock);

        let batches = fetcher.fetch(Underlying::Nifty).await.unwrap();
        let slots: Vec<usize> = batches.iter().map(|b| b.expiry_slot).collect();
        assert_eq!(slots, vec![0, 1, 3, 4, 5]);
        assert!(batches.iter().all(|b| !b.rows.is_empty()));
    }

    /// Test: missing spot price aborts the underlying with an empty result
    #[tokio::test]
    async fn missing_spot_returns_empty() {
        let market = MockMarket {
            spot_nifty: None,
            ..MockMarket::healthy()
        };
        let clock = ManualClock::new(at(2025, 8, 4, 10, 31, 0));
        let fetcher = SnapshotFetcher::new(&market, &clock);

        let batches = fetcher.fetch(Underlying::Nifty).await.unwrap();
        assert!(batches.is_empty());
    }

    /// Test: batch timestamps are floored to the minute even when the fetch
    /// crosses seconds via pacing delays
    #[tokio::test]
    async fn timestamps_are_floored_to_the_minute() {
        let market = MockMarket::healthy();
        let clock = ManualClock::new(at(2025, 8, 4, 10, 31, 47));
        let fetcher = SnapshotFetcher::new(&market, &clock);

        let batches = fetcher.fetch(Underlying::Nifty).await.unwrap();
        assert_eq!(batches.len(), 6);
        for batch in &batches {
            assert_eq!(batch.timestamp, at(2025, 8, 4, 10, 31, 0).time());
            assert_eq!(batch.fetch_time.date(), at(2025, 8, 4, 10, 31, 47).date());
        }
    }
}

// ============================================================================
// CYCLE DRIVER TESTS - State machine, gating, failure isolation
// ============================================================================

mod driver_tests {
    use super::support::*;
    use chain_collector::collector::{CycleDriver, DriverState};
    use chain_collector::shutdown::Shutdown;
    use chain_collector::types::Underlying;

    /// Test: a fetching step captures NIFTY before BANKNIFTY, then idles
    #[tokio::test]
    async fn cycle_processes_underlyings_in_priority_order() {
        let sink = MemorySink::default();
        let written = sink.written.clone();
        let (_handle, shutdown) = Shutdown::new();
        let mut driver = CycleDriver::new(
            ManualClock::new(at(2025, 8, 4, 10, 31, 0)),
            MockMarket::healthy(),
            sink,
            shutdown,
        );

        let next = driver.step(DriverState::Fetching).await;
        assert_eq!(next, Some(DriverState::IdleUntilNextTick));

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 9); // 6 NIFTY + 3 BANKNIFTY
        assert!(written[..6].iter().all(|b| b.underlying == Underlying::Nifty));
        assert!(written[6..]
            .iter()
            .all(|b| b.underlying == Underlying::BankNifty));
    }

    /// Test: a write failure for one underlying never blocks the other
    #[tokio::test]
    async fn write_failure_is_isolated_per_underlying() {
        let sink = MemorySink {
            fail_for: Some(Underlying::Nifty),
            ..MemorySink::default()
        };
        let written = sink.written.clone();
        let (_handle, shutdown) = Shutdown::new();
        let mut driver = CycleDriver::new(
            ManualClock::new(at(2025, 8, 4, 10, 31, 0)),
            MockMarket::healthy(),
            sink,
            shutdown,
        );

        let next = driver.step(DriverState::Fetching).await;
        assert_eq!(next, Some(DriverState::IdleUntilNextTick));

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 3);
        assert!(written
            .iter()
            .all(|b| b.underlying == Underlying::BankNifty));
    }

    /// Test: before the open the driver sleeps to the open threshold, then
    /// starts fetching on the re-check
    #[tokio::test]
    async fn driver_waits_for_the_open() {
        let (_handle, shutdown) = Shutdown::new();
        let mut driver = CycleDriver::new(
            ManualClock::new(at(2025, 8, 4, 8, 0, 0)),
            MockMarket::healthy(),
            MemorySink::default(),
            shutdown,
        );

        let next = driver.step(DriverState::WaitingForClock).await;
        assert_eq!(next, Some(DriverState::WaitingForClock));

        let next = driver.step(DriverState::WaitingForClock).await;
        assert_eq!(next, Some(DriverState::Fetching));
    }

    /// Test: a Saturday check rolls through Sunday before reaching Monday
    #[tokio::test]
    async fn weekend_rolls_day_by_day_to_monday() {
        let (_handle, shutdown) = Shutdown::new();
        let mut driver = CycleDriver::new(
            ManualClock::new(at(2025, 8, 2, 10, 0, 0)), // Saturday
            MockMarket::healthy(),
            MemorySink::default(),
            shutdown,
        );

        // Saturday -> Sunday 09:15:02, Sunday -> Monday 09:15:02
        let next = driver.step(DriverState::WaitingForClock).await;
        assert_eq!(next, Some(DriverState::WaitingForClock));
        let next = driver.step(DriverState::WaitingForClock).await;
        assert_eq!(next, Some(DriverState::WaitingForClock));

        let next = driver.step(DriverState::WaitingForClock).await;
        assert_eq!(next, Some(DriverState::Fetching));
    }

    /// Test: idle waits until the next whole minute plus the fixed offset
    #[tokio::test]
    async fn idle_sleeps_to_the_next_tick() {
        let clock = ManualClock::new(at(2025, 8, 4, 10, 31, 17));
        let (_handle, shutdown) = Shutdown::new();
        let mut driver = CycleDriver::new(clock, MockMarket::healthy(), MemorySink::default(), shutdown);

        let next = driver.step(DriverState::IdleUntilNextTick).await;
        assert_eq!(next, Some(DriverState::WaitingForClock));
    }

    /// Test: error backoff sleeps the fixed duration and resumes at the clock
    #[tokio::test]
    async fn error_backoff_resumes_at_clock_check() {
        let (_handle, shutdown) = Shutdown::new();
        let mut driver = CycleDriver::new(
            ManualClock::new(at(2025, 8, 4, 10, 31, 0)),
            MockMarket::healthy(),
            MemorySink::default(),
            shutdown,
        );

        let next = driver.step(DriverState::ErrorBackoff).await;
        assert_eq!(next, Some(DriverState::WaitingForClock));
    }

    /// Test: an observed shutdown stops the machine from any state
    #[tokio::test]
    async fn shutdown_exits_cleanly() {
        let (handle, shutdown) = Shutdown::new();
        let sink = MemorySink::default();
        let written = sink.written.clone();
        let mut driver = CycleDriver::new(
            ManualClock::new(at(2025, 8, 4, 10, 31, 0)),
            MockMarket::healthy(),
            sink,
            shutdown,
        );

        handle.trigger();
        for state in [
            DriverState::WaitingForClock,
            DriverState::Fetching,
            DriverState::IdleUntilNextTick,
            DriverState::ErrorBackoff,
        ] {
            assert_eq!(driver.step(state).await, None);
        }
        // No partial work after the signal
        assert!(written.lock().unwrap().is_empty());
    }
}

// ============================================================================
// PERSISTENCE SEMANTICS - Append-only behavior at the sink boundary
// ============================================================================

mod persistence_tests {
    use super::support::*;
    use chain_collector::fetcher::SnapshotFetcher;
    use chain_collector::storage::SnapshotSink;
    use chain_collector::types::Underlying;

    /// Test: writing an identical batch twice produces two row sets
    #[tokio::test]
    async fn rewriting_a_batch_appends() {
        let market = MockMarket::healthy();
        let clock = ManualClock::new(at(2025, 8, 4, 10, 31, 0));
        let fetcher = SnapshotFetcher::new(&market, &clock);
        let batches = fetcher.fetch(Underlying::BankNifty).await.unwrap();
        let batch = &batches[0];

        let sink = MemorySink::default();
        let first = sink.write(batch).await.unwrap();
        let second = sink.write(batch).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(sink.written.lock().unwrap().len(), 2);
    }
}
