// =============================================================================
// Binance REST Client — public market data (no signing)
// =============================================================================
//
// Implements `MarketDataClient` over two public endpoints:
//   GET /api/v3/klines?symbol=..&interval=..&limit=..
//   GET /api/v3/ticker/24hr?symbol=..
//
// Binance encodes prices and volumes as JSON strings. Only the first five
// kline fields (openTime, open, high, low, close) are consumed.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::binance::rate_limit::RateLimitTracker;
use crate::error::FetchError;
use crate::market_data::MarketDataClient;
use crate::types::{CandlePoint, CandleSeries, Granularity, TickerSnapshot};

/// Default production endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Number of leading kline fields the tracker reads.
const KLINE_FIELDS_USED: usize = 5;

/// Binance public REST client.
#[derive(Clone)]
pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
    rate_limits: Arc<RateLimitTracker>,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a client against `base_url` with a per-request `timeout`.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        rate_limits: Arc<RateLimitTracker>,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %base_url, "BinanceClient initialised");

        Ok(Self {
            base_url,
            client,
            rate_limits,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    /// GET `path` and decode the body as JSON, mapping every failure into a
    /// [`FetchError`].
    async fn get_json(&self, path: &str) -> Result<serde_json::Value, FetchError> {
        let url = format!("{}{}", self.base_url, path);

        let resp = self.client.get(&url).send().await?;
        self.rate_limits.update_from_headers(resp.headers());

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| FetchError::Malformed(format!("{path}: invalid JSON: {e}")))
    }
}

#[async_trait]
impl MarketDataClient for BinanceClient {
    /// GET /api/v3/ticker/24hr for one symbol.
    #[instrument(skip(self), name = "binance::fetch_ticker")]
    async fn fetch_ticker(&self, symbol: &str) -> Result<TickerSnapshot, FetchError> {
        let body = self
            .get_json(&format!("/api/v3/ticker/24hr?symbol={symbol}"))
            .await?;
        let ticker = parse_ticker(&body)?;
        debug!(symbol, last_price = ticker.last_price, "ticker fetched");
        Ok(ticker)
    }

    /// GET /api/v3/klines for one symbol.
    #[instrument(skip(self), name = "binance::fetch_candles")]
    async fn fetch_candles(
        &self,
        symbol: &str,
        granularity: Granularity,
        count: u32,
    ) -> Result<CandleSeries, FetchError> {
        let body = self
            .get_json(&format!(
                "/api/v3/klines?symbol={symbol}&interval={granularity}&limit={count}"
            ))
            .await?;
        let series = parse_klines(&body)?;
        debug!(symbol, %granularity, count = series.len(), "klines fetched");
        Ok(series)
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Payload parsing
// -----------------------------------------------------------------------------

/// Parse a klines array-of-arrays body. Entries shorter than five fields are
/// skipped.
pub fn parse_klines(body: &serde_json::Value) -> Result<CandleSeries, FetchError> {
    let raw = body
        .as_array()
        .ok_or_else(|| FetchError::Malformed("klines response is not an array".into()))?;

    let mut points = Vec::with_capacity(raw.len());
    for entry in raw {
        let arr = entry
            .as_array()
            .ok_or_else(|| FetchError::Malformed("kline entry is not an array".into()))?;

        if arr.len() < KLINE_FIELDS_USED {
            warn!("skipping malformed kline entry with {} elements", arr.len());
            continue;
        }

        let timestamp = arr[0]
            .as_i64()
            .ok_or_else(|| FetchError::Malformed(format!("kline open time: {}", arr[0])))?;

        points.push(CandlePoint {
            timestamp,
            open: parse_str_f64(&arr[1], "open")?,
            high: parse_str_f64(&arr[2], "high")?,
            low: parse_str_f64(&arr[3], "low")?,
            close: parse_str_f64(&arr[4], "close")?,
        });
    }

    Ok(CandleSeries::new(points))
}

/// Parse a 24hr ticker body.
pub fn parse_ticker(body: &serde_json::Value) -> Result<TickerSnapshot, FetchError> {
    Ok(TickerSnapshot {
        last_price: parse_str_f64(&body["lastPrice"], "lastPrice")?,
        price_change_percent: parse_str_f64(&body["priceChangePercent"], "priceChangePercent")?,
        volume: parse_str_f64(&body["volume"], "volume")?,
    })
}

/// Parse a JSON value that may be either a numeric string or a number.
fn parse_str_f64(val: &serde_json::Value, name: &str) -> Result<f64, FetchError> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| FetchError::Malformed(format!("field {name}: '{s}' is not a number"))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| FetchError::Malformed(format!("field {name} is not a valid f64"))),
        serde_json::Value::Null => Err(FetchError::Malformed(format!("missing field {name}"))),
        other => Err(FetchError::Malformed(format!(
            "field {name} has unexpected JSON type: {other}"
        ))),
    }
}

// =============================================================================
// Tests
// =============================================================================
