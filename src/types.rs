//! Core type definitions for the option chain collector.
//!
//! This module provides the underlying policy table, provenance tagging for
//! fallback values, and the capture batch produced by each fetch.

use chrono::{NaiveDateTime, NaiveTime};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::storage::StrikeRowRecord;

/// Index underlying tracked by the collector.
///
/// The variants double as a static policy table: expiry depth, ATM rounding
/// step, broker security id, and destination table all key off the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Underlying {
    Nifty,
    BankNifty,
}

impl Underlying {
    /// Fixed processing order: NIFTY always completes before BANKNIFTY starts.
    pub const ALL: [Underlying; 2] = [Underlying::Nifty, Underlying::BankNifty];

    /// Broker-facing symbol name.
    pub fn symbol(&self) -> &'static str {
        match self {
            Underlying::Nifty => "NIFTY",
            Underlying::BankNifty => "BANKNIFTY",
        }
    }

    /// Dhan security id for the index (IDX_I segment).
    pub fn security_id(&self) -> u64 {
        match self {
            Underlying::Nifty => 13,
            Underlying::BankNifty => 25,
        }
    }

    /// Number of expiry slots captured per cycle.
    pub fn expiry_count(&self) -> usize {
        match self {
            Underlying::Nifty => 6,
            Underlying::BankNifty => 3,
        }
    }

    /// Rounding step for the spot-derived ATM strike fallback.
    pub fn strike_step(&self) -> f64 {
        match self {
            Underlying::Nifty => 100.0,
            Underlying::BankNifty => 1000.0,
        }
    }

    /// Destination table, schema-qualified.
    pub fn table(&self) -> &'static str {
        match self {
            Underlying::Nifty => "option_chain.nifty_option_chain",
            Underlying::BankNifty => "option_chain.banknifty_option_chain",
        }
    }
}

impl std::fmt::Display for Underlying {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Whether a value came from the broker or was synthesized locally.
///
/// ATM strikes and expiry labels fall back to derived values when the broker
/// call fails; the tag lets callers and tests tell the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Broker,
    Derived,
}

/// Resolved ATM strike selection for one (underlying, expiry slot).
#[derive(Debug, Clone)]
pub struct AtmSelection {
    pub strike: f64,
    pub call_label: String,
    pub put_label: String,
    pub source: Provenance,
}

impl AtmSelection {
    /// Spot-derived fallback: round spot to the underlying's strike step and
    /// synthesize placeholder labels in place of the broker's naming.
    pub fn fallback(underlying: Underlying, expiry_slot: usize, spot: f64) -> Self {
        let step = underlying.strike_step();
        let strike = (spot / step).round() * step;
        Self {
            strike,
            call_label: format!("{} {} {} CALL", underlying.symbol(), expiry_slot, strike),
            put_label: format!("{} {} {} PUT", underlying.symbol(), expiry_slot, strike),
            source: Provenance::Derived,
        }
    }
}

/// One fetch's row set for a single (underlying, expiry slot).
///
/// Every row shares the batch-level stamps; `timestamp` is floored to the
/// start of the minute in which this batch's fetch began.
#[derive(Debug, Clone)]
pub struct CaptureBatch {
    pub underlying: Underlying,
    pub expiry_slot: usize,
    pub expiry_date: String,
    pub expiry_source: Provenance,
    pub spot_price: Decimal,
    pub atm_strike: Decimal,
    pub atm_source: Provenance,
    pub fetch_time: NaiveDateTime,
    pub timestamp: NaiveTime,
    pub rows: Vec<StrikeRowRecord>,
}

/// Convert a broker f64 price to the 2-decimal storage representation.
pub fn price_dec(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(2)
}

/// Convert a broker f64 greek to the 4-decimal storage representation.
pub fn greek_dec(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nifty_fallback_rounds_to_nearest_hundred() {
        let sel = AtmSelection::fallback(Underlying::Nifty, 0, 24_713.0);
        assert_eq!(sel.strike, 24_700.0);
        assert_eq!(sel.source, Provenance::Derived);
    }

    #[test]
    fn banknifty_fallback_rounds_to_nearest_thousand() {
        let sel = AtmSelection::fallback(Underlying::BankNifty, 0, 51_482.0);
        assert_eq!(sel.strike, 51_000.0);
    }

    #[test]
    fn processing_order_is_nifty_first() {
        assert_eq!(Underlying::ALL[0], Underlying::Nifty);
        assert_eq!(Underlying::ALL[1], Underlying::BankNifty);
    }

    #[test]
    fn price_dec_rounds_to_cents() {
        assert_eq!(price_dec(24_713.456), Decimal::new(2_471_346, 2));
    }
}
