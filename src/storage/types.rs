//! Storage record types and the display-to-storage column mapping.

use rust_decimal::Decimal;

/// Per-strike call/put market data, already converted to storage decimals.
///
/// Field order follows the persisted column order.
#[derive(Debug, Clone, Default)]
pub struct StrikeRowRecord {
    pub strike_price: Decimal,

    // Call side
    pub ce_oi: i64,
    pub ce_chg_in_oi: i64,
    pub ce_volume: i64,
    pub ce_iv: Decimal,
    pub ce_ltp: Decimal,
    pub ce_bid_qty: i64,
    pub ce_bid: Decimal,
    pub ce_ask: Decimal,
    pub ce_ask_qty: i64,
    pub ce_delta: Decimal,
    pub ce_theta: Decimal,
    pub ce_gamma: Decimal,
    pub ce_vega: Decimal,

    // Put side
    pub pe_bid_qty: i64,
    pub pe_bid: Decimal,
    pub pe_ask: Decimal,
    pub pe_ask_qty: i64,
    pub pe_ltp: Decimal,
    pub pe_iv: Decimal,
    pub pe_volume: i64,
    pub pe_chg_in_oi: i64,
    pub pe_oi: i64,
    pub pe_delta: Decimal,
    pub pe_theta: Decimal,
    pub pe_gamma: Decimal,
    pub pe_vega: Decimal,
}

/// Display-name to storage-column mapping, declared once so it can be audited
/// and tested in isolation from the fetch path.
pub const COLUMN_MAP: &[(&str, &str)] = &[
    ("Spot Price", "spot_price"),
    ("ATM Strike", "atm_strike"),
    ("Strike Price", "strike_price"),
    ("CE OI", "ce_oi"),
    ("CE Chg in OI", "ce_chg_in_oi"),
    ("CE Volume", "ce_volume"),
    ("CE IV", "ce_iv"),
    ("CE LTP", "ce_ltp"),
    ("CE Bid Qty", "ce_bid_qty"),
    ("CE Bid", "ce_bid"),
    ("CE Ask", "ce_ask"),
    ("CE Ask Qty", "ce_ask_qty"),
    ("CE Delta", "ce_delta"),
    ("CE Theta", "ce_theta"),
    ("CE Gamma", "ce_gamma"),
    ("CE Vega", "ce_vega"),
    ("PE Bid Qty", "pe_bid_qty"),
    ("PE Bid", "pe_bid"),
    ("PE Ask", "pe_ask"),
    ("PE Ask Qty", "pe_ask_qty"),
    ("PE LTP", "pe_ltp"),
    ("PE IV", "pe_iv"),
    ("PE Volume", "pe_volume"),
    ("PE Chg in OI", "pe_chg_in_oi"),
    ("PE OI", "pe_oi"),
    ("PE Delta", "pe_delta"),
    ("PE Theta", "pe_theta"),
    ("PE Gamma", "pe_gamma"),
    ("PE Vega", "pe_vega"),
];

/// Full insert column list: batch identity, then the mapped data columns,
/// then the floored-minute timestamp.
pub fn insert_columns() -> Vec<&'static str> {
    let mut columns = vec!["symbol", "expiry_date", "fetch_time"];
    columns.extend(COLUMN_MAP.iter().map(|(_, storage)| *storage));
    columns.push("timestamp");
    columns
}
