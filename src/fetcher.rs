//! Snapshot fetcher: one underlying per call, one capture batch per expiry slot.
//!
//! Upstream failures are contained here. A missing spot price aborts the
//! underlying (empty result); a failed slot is logged and absent from the
//! result, never null-padded.

use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::clock::{floor_to_minute, Clock};
use crate::config::{CHAIN_STRIKE_COUNT, PACING_DELAY_MS};
use crate::dhan::{ChainStrike, MarketData};
use crate::storage::StrikeRowRecord;
use crate::types::{greek_dec, price_dec, AtmSelection, CaptureBatch, Provenance, Underlying};

pub struct SnapshotFetcher<'a, M: MarketData, C: Clock> {
    market: &'a M,
    clock: &'a C,
}

impl<'a, M: MarketData, C: Clock> SnapshotFetcher<'a, M, C> {
    pub fn new(market: &'a M, clock: &'a C) -> Self {
        Self { market, clock }
    }

    /// Fetch capture batches for every expiry slot of `underlying`.
    pub async fn fetch(&self, underlying: Underlying) -> Result<Vec<CaptureBatch>> {
        let spot = match self.market.spot_price(underlying).await {
            Ok(Some(price)) => price,
            Ok(None) => {
                warn!("[FETCH] Could not fetch {} spot price", underlying);
                return Ok(Vec::new());
            }
            Err(e) => {
                warn!("[FETCH] Spot price request for {} failed: {:#}", underlying, e);
                return Ok(Vec::new());
            }
        };
        info!("[FETCH] Current {} spot price: {}", underlying, spot);

        let expiry_count = underlying.expiry_count();
        info!("[FETCH] Processing {} expiries for {}", expiry_count, underlying);

        let mut batches = Vec::with_capacity(expiry_count);
        for slot in 0..expiry_count {
            // A failure on one slot must not stop subsequent slots.
            if let Some(batch) = self.fetch_slot(underlying, slot, spot).await {
                batches.push(batch);
            }
        }
        Ok(batches)
    }

    async fn fetch_slot(
        &self,
        underlying: Underlying,
        slot: usize,
        spot: f64,
    ) -> Option<CaptureBatch> {
        let selection = match self.market.select_atm(underlying, slot).await {
            Ok(quote) => AtmSelection {
                strike: quote.atm_strike,
                call_label: quote.call_label,
                put_label: quote.put_label,
                source: Provenance::Broker,
            },
            Err(e) => {
                warn!(
                    "[FETCH] ATM selection failed for {} slot {}: {:#}",
                    underlying, slot, e
                );
                let fallback = AtmSelection::fallback(underlying, slot, spot);
                info!("[FETCH] Using fallback ATM strike: {}", fallback.strike);
                fallback
            }
        };

        let (expiry_date, expiry_source) = resolve_expiry(&selection, slot);
        info!(
            "[FETCH] Processing {} expiry: {} (ATM strike {})",
            underlying, expiry_date, selection.strike
        );

        // Rate-limit courtesy before the chain request.
        self.clock.sleep(Duration::from_millis(PACING_DELAY_MS)).await;

        let strikes = match self
            .market
            .option_chain(underlying, "INDEX", slot, CHAIN_STRIKE_COUNT)
            .await
        {
            Ok((_meta, strikes)) if !strikes.is_empty() => strikes,
            Ok(_) => {
                warn!(
                    "[FETCH] Empty option chain for {} expiry {}",
                    underlying, expiry_date
                );
                return None;
            }
            Err(e) => {
                warn!(
                    "[FETCH] Failed to fetch option chain for {} expiry {}: {:#}",
                    underlying, expiry_date, e
                );
                return None;
            }
        };

        let fetch_time = self.clock.now();
        let rows: Vec<StrikeRowRecord> = strikes.iter().map(strike_row).collect();
        info!(
            "[FETCH] Captured {} strikes for {} expiry {}",
            rows.len(),
            underlying,
            expiry_date
        );

        Some(CaptureBatch {
            underlying,
            expiry_slot: slot,
            expiry_date,
            expiry_source,
            spot_price: price_dec(spot),
            atm_strike: price_dec(selection.strike),
            atm_source: selection.source,
            fetch_time,
            timestamp: floor_to_minute(fetch_time),
            rows,
        })
    }
}

/// Parse the expiry calendar date out of the call label (tokens 1..3 of
/// "NIFTY 14 AUG 24700 CALL"). Labels too short to carry a date yield the
/// `Expiry_<slot>` substitute.
fn resolve_expiry(selection: &AtmSelection, slot: usize) -> (String, Provenance) {
    let parts: Vec<&str> = selection.call_label.split_whitespace().collect();
    if parts.len() >= 4 {
        (parts[1..3].join(" "), selection.source)
    } else {
        (format!("Expiry_{}", slot), Provenance::Derived)
    }
}

fn strike_row(strike: &ChainStrike) -> StrikeRowRecord {
    StrikeRowRecord {
        strike_price: price_dec(strike.strike),
        ce_oi: strike.call.oi,
        ce_chg_in_oi: strike.call.chg_in_oi,
        ce_volume: strike.call.volume,
        ce_iv: price_dec(strike.call.iv),
        ce_ltp: price_dec(strike.call.ltp),
        ce_bid_qty: strike.call.bid_qty,
        ce_bid: price_dec(strike.call.bid),
        ce_ask: price_dec(strike.call.ask),
        ce_ask_qty: strike.call.ask_qty,
        ce_delta: greek_dec(strike.call.delta),
        ce_theta: greek_dec(strike.call.theta),
        ce_gamma: greek_dec(strike.call.gamma),
        ce_vega: greek_dec(strike.call.vega),
        pe_bid_qty: strike.put.bid_qty,
        pe_bid: price_dec(strike.put.bid),
        pe_ask: price_dec(strike.put.ask),
        pe_ask_qty: strike.put.ask_qty,
        pe_ltp: price_dec(strike.put.ltp),
        pe_iv: price_dec(strike.put.iv),
        pe_volume: strike.put.volume,
        pe_chg_in_oi: strike.put.chg_in_oi,
        pe_oi: strike.put.oi,
        pe_delta: greek_dec(strike.put.delta),
        pe_theta: greek_dec(strike.put.theta),
        pe_gamma: greek_dec(strike.put.gamma),
        pe_vega: greek_dec(strike.put.vega),
    }
}
