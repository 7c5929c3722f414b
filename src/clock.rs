//! Market session clock and the injectable time source.
//!
//! `market_phase` is a pure function over wall-clock time so the scheduling
//! rules can be tested without sleeping; the `Clock` trait lets the cycle
//! driver run against a manual clock in tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDateTime, NaiveTime, Timelike, Weekday};

use crate::config::{CYCLE_SECOND_OFFSET, MARKET_CLOSE_HMS, MARKET_OPEN_HMS};

/// Where the current instant falls relative to the trading session.
///
/// Non-open variants carry the exact instant at which the caller should check
/// again. No holiday calendar is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketPhase {
    Open,
    BeforeOpen { next_check: NaiveDateTime },
    AfterClose { next_check: NaiveDateTime },
    Weekend { next_check: NaiveDateTime },
}

fn hms((h, m, s): (u32, u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, s).expect("valid session threshold")
}

/// Market open time-of-day (09:15:02).
pub fn market_open() -> NaiveTime {
    hms(MARKET_OPEN_HMS)
}

/// Market close time-of-day (15:30:00).
pub fn market_close() -> NaiveTime {
    hms(MARKET_CLOSE_HMS)
}

/// Open time on the calendar day after `now`.
///
/// A Saturday check lands on Sunday and re-detects the weekend there, same as
/// an after-close check on Friday evening.
fn next_day_open(now: NaiveDateTime) -> NaiveDateTime {
    let next_day = now
        .date()
        .checked_add_days(Days::new(1))
        .unwrap_or(now.date());
    next_day.and_time(market_open())
}

/// Classify `now` against the trading session.
pub fn market_phase(now: NaiveDateTime) -> MarketPhase {
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return MarketPhase::Weekend {
            next_check: next_day_open(now),
        };
    }
    if now.time() < market_open() {
        return MarketPhase::BeforeOpen {
            next_check: now.date().and_time(market_open()),
        };
    }
    if now.time() > market_close() {
        return MarketPhase::AfterClose {
            next_check: next_day_open(now),
        };
    }
    MarketPhase::Open
}

/// Floor a timestamp to the start of its minute.
pub fn floor_to_minute(dt: NaiveDateTime) -> NaiveTime {
    dt.time()
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(dt.time())
}

/// The next cycle start: the next whole-minute boundary plus the fixed offset.
pub fn next_tick(now: NaiveDateTime) -> NaiveDateTime {
    let base = now + chrono::Duration::minutes(1);
    base.with_second(CYCLE_SECOND_OFFSET)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(base)
}

/// Time source used by the fetcher and cycle driver.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current local wall-clock time.
    fn now(&self) -> NaiveDateTime;

    /// Sleep for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Real wall clock backed by tokio sleeps.
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
