//! Dhan market-data client.
//!
//! REST client for the Dhan v2 endpoints the collector consumes: index LTP,
//! expiry list, and the strike-wise option chain. The `MarketData` trait is
//! the seam the fetcher and tests program against.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{DhanCredentials, DHAN_API_BASE, HTTP_TIMEOUT_SECS};
use crate::types::Underlying;

/// Index exchange segment used for both underlyings.
const INDEX_SEGMENT: &str = "IDX_I";

// === Collaborator surface ===

/// Per-side (call or put) quote for one strike, broker wire values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SideQuote {
    pub oi: i64,
    pub chg_in_oi: i64,
    pub volume: i64,
    pub iv: f64,
    pub ltp: f64,
    pub bid_qty: i64,
    pub bid: f64,
    pub ask: f64,
    pub ask_qty: i64,
    pub delta: f64,
    pub theta: f64,
    pub gamma: f64,
    pub vega: f64,
}

/// One strike's call/put data as returned by the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChainStrike {
    pub strike: f64,
    pub call: SideQuote,
    pub put: SideQuote,
}

/// Metadata half of an option chain result.
#[derive(Debug, Clone)]
pub struct ChainMeta {
    pub symbol: String,
    /// Expiry date, YYYY-MM-DD.
    pub expiry: String,
    pub underlying_price: f64,
}

/// ATM strike selection: contract labels plus the selected strike.
#[derive(Debug, Clone)]
pub struct AtmQuote {
    pub call_label: String,
    pub put_label: String,
    pub atm_strike: f64,
}

/// Market-data collaborator consumed by the snapshot fetcher.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Current spot price, or `None` when the broker has no quote.
    async fn spot_price(&self, underlying: Underlying) -> Result<Option<f64>>;

    /// ATM strike selection for the given expiry slot (0 = nearest).
    async fn select_atm(&self, underlying: Underlying, expiry_slot: usize) -> Result<AtmQuote>;

    /// Option chain for the given expiry slot, windowed to `strike_count`
    /// strikes centered on the ATM strike.
    async fn option_chain(
        &self,
        underlying: Underlying,
        exchange: &str,
        expiry_slot: usize,
        strike_count: usize,
    ) -> Result<(ChainMeta, Vec<ChainStrike>)>;
}

// === Wire types (Dhan v2) ===

#[derive(Debug, Deserialize)]
struct LtpEnvelope {
    data: HashMap<String, HashMap<String, TickerData>>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    last_price: f64,
}

/// Request body for `POST /v2/optionchain/expirylist`.
#[derive(Debug, Serialize)]
#[allow(non_snake_case)]
struct ExpiryListRequest {
    UnderlyingScrip: u64,
    UnderlyingSeg: String,
}

#[derive(Debug, Deserialize)]
struct ExpiryListEnvelope {
    data: Vec<String>,
    status: String,
}

/// Request body for `POST /v2/optionchain`.
#[derive(Debug, Serialize)]
#[allow(non_snake_case)]
struct ChainRequest {
    UnderlyingScrip: u64,
    UnderlyingSeg: String,
    Expiry: String,
}

#[derive(Debug, Deserialize)]
struct ChainEnvelope {
    data: ChainData,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ChainData {
    last_price: f64,
    /// Strike-wise chain; keys are strike prices as strings (e.g. "24700.000000").
    oc: HashMap<String, StrikeEntry>,
}

#[derive(Debug, Deserialize)]
struct StrikeEntry {
    ce: Option<WireOption>,
    pe: Option<WireOption>,
}

#[derive(Debug, Deserialize)]
struct WireOption {
    last_price: f64,
    #[serde(default)]
    greeks: Option<WireGreeks>,
    #[serde(default)]
    implied_volatility: Option<f64>,
    #[serde(default)]
    oi: Option<i64>,
    #[serde(default)]
    previous_oi: Option<i64>,
    #[serde(default)]
    top_ask_price: Option<f64>,
    #[serde(default)]
    top_ask_quantity: Option<i64>,
    #[serde(default)]
    top_bid_price: Option<f64>,
    #[serde(default)]
    top_bid_quantity: Option<i64>,
    #[serde(default)]
    volume: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireGreeks {
    delta: f64,
    theta: f64,
    gamma: f64,
    vega: f64,
}

// === Client ===

/// Shared, stateless-from-the-caller's-view REST client.
pub struct DhanClient {
    http: reqwest::Client,
    base_url: String,
    creds: DhanCredentials,
}

impl DhanClient {
    pub fn new(creds: DhanCredentials) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: DHAN_API_BASE.to_string(),
            creds,
        }
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .header("access-token", &self.creds.token_id)
            .header("client-id", &self.creds.client_code)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", path))?;

        if !resp.status().is_success() {
            bail!("{} returned HTTP {}", path, resp.status());
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("failed to decode {} response", path))
    }

    async fn expiry_list(&self, underlying: Underlying) -> Result<Vec<String>> {
        let env: ExpiryListEnvelope = self
            .post(
                "/v2/optionchain/expirylist",
                &ExpiryListRequest {
                    UnderlyingScrip: underlying.security_id(),
                    UnderlyingSeg: INDEX_SEGMENT.to_string(),
                },
            )
            .await?;
        if env.status != "success" {
            bail!("expiry list for {} returned status {}", underlying, env.status);
        }
        Ok(env.data)
    }

    async fn expiry_at(&self, underlying: Underlying, expiry_slot: usize) -> Result<String> {
        let expiries = self.expiry_list(underlying).await?;
        expiries
            .get(expiry_slot)
            .cloned()
            .with_context(|| format!("{} has no expiry at slot {}", underlying, expiry_slot))
    }

    async fn raw_chain(&self, underlying: Underlying, expiry: &str) -> Result<ChainData> {
        let env: ChainEnvelope = self
            .post(
                "/v2/optionchain",
                &ChainRequest {
                    UnderlyingScrip: underlying.security_id(),
                    UnderlyingSeg: INDEX_SEGMENT.to_string(),
                    Expiry: expiry.to_string(),
                },
            )
            .await?;
        if env.status != "success" {
            bail!("option chain for {} returned status {}", underlying, env.status);
        }
        Ok(env.data)
    }
}

#[async_trait]
impl MarketData for DhanClient {
    async fn spot_price(&self, underlying: Underlying) -> Result<Option<f64>> {
        let body = json!({ INDEX_SEGMENT: [underlying.security_id()] });
        let env: LtpEnvelope = self.post("/v2/marketfeed/ltp", &body).await?;
        if env.status != "success" {
            bail!("ltp for {} returned status {}", underlying, env.status);
        }

        let price = env
            .data
            .get(INDEX_SEGMENT)
            .and_then(|segment| segment.get(&underlying.security_id().to_string()))
            .map(|ticker| ticker.last_price);
        Ok(price)
    }

    async fn select_atm(&self, underlying: Underlying, expiry_slot: usize) -> Result<AtmQuote> {
        let expiry = self.expiry_at(underlying, expiry_slot).await?;
        let chain = self.raw_chain(underlying, &expiry).await?;

        let atm_strike = nearest_strike(&chain).context("empty option chain")?;
        let label_date = expiry_label_date(&expiry)?;

        Ok(AtmQuote {
            call_label: format!(
                "{} {} {} CALL",
                underlying.symbol(),
                label_date,
                atm_strike as i64
            ),
            put_label: format!(
                "{} {} {} PUT",
                underlying.symbol(),
                label_date,
                atm_strike as i64
            ),
            atm_strike,
        })
    }

    async fn option_chain(
        &self,
        underlying: Underlying,
        exchange: &str,
        expiry_slot: usize,
        strike_count: usize,
    ) -> Result<(ChainMeta, Vec<ChainStrike>)> {
        if exchange != "INDEX" {
            bail!("unsupported exchange: {}", exchange);
        }

        let expiry = self.expiry_at(underlying, expiry_slot).await?;
        let chain = self.raw_chain(underlying, &expiry).await?;
        let rows = window_strikes(&chain, strike_count);
        let meta = ChainMeta {
            symbol: underlying.symbol().to_string(),
            expiry,
            underlying_price: chain.last_price,
        };
        Ok((meta, rows))
    }
}

/// Strike closest to the underlying's last price.
fn nearest_strike(chain: &ChainData) -> Option<f64> {
    let spot = chain.last_price;
    chain
        .oc
        .keys()
        .filter_map(|k| k.parse::<f64>().ok())
        .min_by(|a, b| {
            (a - spot)
                .abs()
                .partial_cmp(&(b - spot).abs())
                .unwrap_or(Ordering::Equal)
        })
}

/// Format an expiry date for contract labels: "2025-08-14" -> "14 AUG".
fn expiry_label_date(expiry: &str) -> Result<String> {
    let date = NaiveDate::parse_from_str(expiry, "%Y-%m-%d")
        .with_context(|| format!("unparseable expiry date: {}", expiry))?;
    Ok(date.format("%d %b").to_string().to_uppercase())
}

/// Sort the strike-wise map and window it to `strike_count` strikes centered
/// on the strike nearest the underlying price.
fn window_strikes(chain: &ChainData, strike_count: usize) -> Vec<ChainStrike> {
    let mut rows: Vec<ChainStrike> = chain
        .oc
        .iter()
        .filter_map(|(key, entry)| {
            let strike = key.parse::<f64>().ok()?;
            Some(ChainStrike {
                strike,
                call: side_quote(entry.ce.as_ref()),
                put: side_quote(entry.pe.as_ref()),
            })
        })
        .collect();
    rows.sort_by(|a, b| a.strike.partial_cmp(&b.strike).unwrap_or(Ordering::Equal));

    if rows.len() <= strike_count {
        return rows;
    }

    let spot = chain.last_price;
    let atm_index = rows
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (a.strike - spot)
                .abs()
                .partial_cmp(&(b.strike - spot).abs())
                .unwrap_or(Ordering::Equal)
        })
        .map(|(i, _)| i)
        .unwrap_or(0);

    let start = atm_index
        .saturating_sub(strike_count / 2)
        .min(rows.len() - strike_count);
    rows[start..start + strike_count].to_vec()
}

fn side_quote(wire: Option<&WireOption>) -> SideQuote {
    let Some(o) = wire else {
        return SideQuote::default();
    };
    let oi = o.oi.unwrap_or(0);
    SideQuote {
        oi,
        chg_in_oi: oi - o.previous_oi.unwrap_or(0),
        volume: o.volume.unwrap_or(0),
        iv: o.implied_volatility.unwrap_or(0.0),
        ltp: o.last_price,
        bid_qty: o.top_bid_quantity.unwrap_or(0),
        bid: o.top_bid_price.unwrap_or(0.0),
        ask: o.top_ask_price.unwrap_or(0.0),
        ask_qty: o.top_ask_quantity.unwrap_or(0),
        delta: o.greeks.as_ref().map(|g| g.delta).unwrap_or(0.0),
        theta: o.greeks.as_ref().map(|g| g.theta).unwrap_or(0.0),
        gamma: o.greeks.as_ref().map(|g| g.gamma).unwrap_or(0.0),
        vega: o.greeks.as_ref().map(|g| g.vega).unwrap_or(0.0),
    }
}
