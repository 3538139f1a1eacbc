//! Scripted in-memory market data client for refresh tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::catalog::SymbolCatalog;
use crate::error::FetchError;
use crate::market_data::MarketDataClient;
use crate::refresh::orchestrator::RefreshOrchestrator;
use crate::state_store::SymbolStateStore;
use crate::types::{CandlePoint, CandleSeries, Granularity, Symbol, TickerSnapshot};

/// One recorded provider request.
#[derive(Debug, Clone)]
pub struct Call {
    pub symbol: String,
    /// `Some` for candle requests.
    pub granularity: Option<Granularity>,
    pub count: Option<u32>,
    /// Time the request was issued.
    pub at: Instant,
}

impl Call {
    pub fn is_candles(&self) -> bool {
        self.granularity.is_some()
    }
}

#[derive(Default)]
struct Script {
    latency: Duration,
    failing_candles: HashSet<String>,
    failing_ticker: HashSet<String>,
    empty_candles: HashSet<String>,
}

/// Deterministic client: always returns the same data for the same request
/// unless told to fail.
#[derive(Default)]
pub struct ScriptedClient {
    script: Mutex<Script>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated latency applied to every request.
    pub fn set_latency(&self, latency: Duration) {
        self.script.lock().latency = latency;
    }

    pub fn fail_candles(&self, symbol: &str) {
        self.script.lock().failing_candles.insert(symbol.to_string());
    }

    pub fn fail_ticker(&self, symbol: &str) {
        self.script.lock().failing_ticker.insert(symbol.to_string());
    }

    pub fn return_empty_candles(&self, symbol: &str) {
        self.script.lock().empty_candles.insert(symbol.to_string());
    }

    /// Clear every scripted failure.
    pub fn heal(&self) {
        let mut script = self.script.lock();
        script.failing_candles.clear();
        script.failing_ticker.clear();
        script.empty_candles.clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn record(&self, symbol: &str, granularity: Option<Granularity>, count: Option<u32>) -> Duration {
        self.calls.lock().push(Call {
            symbol: symbol.to_string(),
            granularity,
            count,
            at: Instant::now(),
        });
        self.script.lock().latency
    }
}

#[async_trait]
impl MarketDataClient for ScriptedClient {
    async fn fetch_ticker(&self, symbol: &str) -> Result<TickerSnapshot, FetchError> {
        let latency = self.record(symbol, None, None);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.script.lock().failing_ticker.contains(symbol) {
            return Err(FetchError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(TickerSnapshot {
            last_price: 100.0,
            price_change_percent: 1.5,
            volume: 1_000.0,
        })
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        granularity: Granularity,
        count: u32,
    ) -> Result<CandleSeries, FetchError> {
        let latency = self.record(symbol, Some(granularity), Some(count));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let (fail, empty) = {
            let script = self.script.lock();
            (
                script.failing_candles.contains(symbol),
                script.empty_candles.contains(symbol),
            )
        };
        if fail {
            return Err(FetchError::Transport("connection reset".into()));
        }
        if empty {
            return Ok(CandleSeries::default());
        }
        let points = (0..count as i64)
            .map(|i| CandlePoint {
                timestamp: i * 60_000,
                open: 100.0 + i as f64,
                high: 101.0 + i as f64,
                low: 99.0 + i as f64,
                close: 100.5 + i as f64,
            })
            .collect();
        Ok(CandleSeries::new(points))
    }
}

/// Assert a paused-clock gap, allowing for the timer wheel's millisecond
/// rounding.
pub fn assert_gap(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual <= expected + Duration::from_millis(5),
        "expected gap of {expected:?}, got {actual:?}"
    );
}

/// Catalog of `ids` wired to a fresh store and a scripted client.
pub fn scripted_orchestrator(
    ids: &[&str],
) -> (Arc<SymbolCatalog>, Arc<ScriptedClient>, RefreshOrchestrator) {
    let catalog = Arc::new(
        SymbolCatalog::new(
            ids.iter()
                .map(|id| Symbol::new(*id, *id, id.trim_end_matches("USDT")))
                .collect(),
        )
        .expect("test catalog"),
    );
    let client = Arc::new(ScriptedClient::new());
    let store = Arc::new(SymbolStateStore::new(catalog.clone()));
    let orchestrator = RefreshOrchestrator::new(client.clone(), store);
    (catalog, client, orchestrator)
}
