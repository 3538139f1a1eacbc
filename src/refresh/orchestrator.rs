// =============================================================================
// Refresh Orchestrator — one full pass over the catalog
// =============================================================================
//
// For each symbol, strictly in catalog order:
//   1. loading = true
//   2. fetch candles, then ticker (both are always requested)
//   3. success  -> replace series + ticker, clear error, stamp last_updated
//      failure  -> has_error = true, cached data untouched, notification
//   4. loading = false
//   5. fixed 500 ms pause before the next symbol, whatever the outcome
//
// A cycle never fails. Worst-case duration is
//   (2 x request latency + 500 ms) x catalog size.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::catalog::SymbolCatalog;
use crate::error::{EmptyResultError, RefreshError};
use crate::market_data::MarketDataClient;
use crate::policy::IntervalPolicy;
use crate::state_store::SymbolStateStore;
use crate::types::{CandleSeries, ObservationWindow, Symbol, TickerSnapshot};

/// Pause between consecutive symbols, keeping request bursts under the
/// provider's rate limit.
pub const PACING_DELAY: Duration = Duration::from_millis(500);

/// Outcome summary of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub window: ObservationWindow,
    pub symbols: usize,
    pub succeeded: usize,
    /// Ids of the symbols that failed, in catalog order.
    pub failed: Vec<String>,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

/// Drives refresh cycles against a market data client and records the
/// results into the shared store.
pub struct RefreshOrchestrator {
    client: Arc<dyn MarketDataClient>,
    store: Arc<SymbolStateStore>,
    pacing: Duration,
}

impl RefreshOrchestrator {
    pub fn new(client: Arc<dyn MarketDataClient>, store: Arc<SymbolStateStore>) -> Self {
        Self {
            client,
            store,
            pacing: PACING_DELAY,
        }
    }

    pub fn store(&self) -> &Arc<SymbolStateStore> {
        &self.store
    }

    /// Refresh every symbol in `catalog` using the request shape from
    /// `policy`. Per-symbol failures are absorbed into the store.
    pub async fn run_cycle(&self, catalog: &SymbolCatalog, policy: &IntervalPolicy) -> CycleReport {
        let started = Instant::now();
        let mut succeeded = 0;
        let mut failed = Vec::new();

        debug!(
            window = %policy.window,
            granularity = %policy.granularity,
            limit = policy.candle_count,
            symbols = catalog.len(),
            "refresh cycle starting"
        );

        for (idx, symbol) in catalog.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.pacing).await;
            }

            match self.refresh_symbol(symbol, policy).await {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    warn!(
                        symbol = %symbol.id,
                        error = %e,
                        "symbol refresh failed — keeping cached data until next cycle"
                    );
                    failed.push(symbol.id.clone());
                }
            }
        }

        let report = CycleReport {
            window: policy.window,
            symbols: catalog.len(),
            succeeded,
            failed,
            elapsed: started.elapsed(),
        };

        info!(
            window = %report.window,
            succeeded = report.succeeded,
            failed = report.failed.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "refresh cycle complete"
        );

        report
    }

    /// Refresh one symbol and record the outcome.
    async fn refresh_symbol(
        &self,
        symbol: &Symbol,
        policy: &IntervalPolicy,
    ) -> Result<(), RefreshError> {
        let _loading = LoadingGuard::begin(&self.store, &symbol.id);

        match self.fetch(symbol, policy).await {
            Ok((series, ticker)) => {
                debug!(
                    symbol = %symbol.id,
                    candles = series.len(),
                    last_close = ?series.last_close(),
                    last_price = ticker.last_price,
                    "symbol refreshed"
                );
                self.store
                    .record_success(&symbol.id, series, ticker, Utc::now());
                Ok(())
            }
            Err(e) => {
                self.store.record_failure(&symbol.id, &e, Utc::now());
                Err(e)
            }
        }
    }

    /// Request candles then ticker. Both requests are always issued; a
    /// candle failure (including an empty result) is reported ahead of a
    /// ticker failure.
    async fn fetch(
        &self,
        symbol: &Symbol,
        policy: &IntervalPolicy,
    ) -> Result<(CandleSeries, TickerSnapshot), RefreshError> {
        let candles = self
            .client
            .fetch_candles(&symbol.id, policy.granularity, policy.candle_count)
            .await
            .map_err(RefreshError::Candles)
            .and_then(|series| {
                if series.is_empty() {
                    Err(EmptyResultError {
                        symbol: symbol.id.clone(),
                    }
                    .into())
                } else {
                    Ok(series.truncated(policy.candle_count as usize))
                }
            });

        let ticker = self
            .client
            .fetch_ticker(&symbol.id)
            .await
            .map_err(RefreshError::Ticker);

        if let (Err(_), Err(e)) = (&candles, &ticker) {
            debug!(symbol = %symbol.id, error = %e, "ticker also failed");
        }

        Ok((candles?, ticker?))
    }
}

/// Clears the loading flag on every exit path, including cancellation.
struct LoadingGuard<'a> {
    store: &'a SymbolStateStore,
    symbol: &'a str,
}

impl<'a> LoadingGuard<'a> {
    fn begin(store: &'a SymbolStateStore, symbol: &'a str) -> Self {
        store.begin_fetch(symbol);
        Self { store, symbol }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.store.finish_fetch(self.symbol);
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::testing::{assert_gap, scripted_orchestrator, Call, ScriptedClient};
    use crate::types::Granularity;

    fn setup(ids: &[&str]) -> (Arc<SymbolCatalog>, Arc<ScriptedClient>, RefreshOrchestrator) {
        scripted_orchestrator(ids)
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_every_symbol_in_order_with_paced_gaps() {
        let (catalog, client, orchestrator) = setup(&["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
        let policy = IntervalPolicy::for_window(ObservationWindow::Short);

        let report = orchestrator.run_cycle(&catalog, &policy).await;
        assert_eq!(report.succeeded, 3);
        assert!(report.failed.is_empty());

        let calls = client.calls();
        let order: Vec<(String, bool)> = calls
            .iter()
            .map(|c| (c.symbol.clone(), c.is_candles()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("BTCUSDT".to_string(), true),
                ("BTCUSDT".to_string(), false),
                ("ETHUSDT".to_string(), true),
                ("ETHUSDT".to_string(), false),
                ("SOLUSDT".to_string(), true),
                ("SOLUSDT".to_string(), false),
            ]
        );

        for c in calls.iter().filter(|c| c.is_candles()) {
            assert_eq!(c.granularity, Some(Granularity::FifteenMinutes));
            assert_eq!(c.count, Some(96));
        }

        // n - 1 pacing delays, no latency in the scripted client.
        let candle_times: Vec<_> = calls.iter().filter(|c| c.is_candles()).map(|c| c.at).collect();
        assert_gap(candle_times[1] - candle_times[0], PACING_DELAY);
        assert_gap(candle_times[2] - candle_times[1], PACING_DELAY);
        assert_gap(report.elapsed, PACING_DELAY * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_applies_after_failures_too() {
        let (catalog, client, orchestrator) = setup(&["BTCUSDT", "ETHUSDT"]);
        client.fail_candles("BTCUSDT");
        let policy = IntervalPolicy::for_window(ObservationWindow::Medium);

        let report = orchestrator.run_cycle(&catalog, &policy).await;
        assert_eq!(report.failed, vec!["BTCUSDT".to_string()]);

        let calls = client.calls();
        let candles = calls.iter().filter(|c| c.is_candles()).count();
        let tickers = calls.len() - candles;
        assert_eq!((candles, tickers), (2, 2));
        assert_eq!(calls[1].symbol, "BTCUSDT");
        assert!(!calls[1].is_candles());
        assert_eq!(calls[2].symbol, "ETHUSDT");
        assert_gap(calls[2].at - calls[1].at, PACING_DELAY);

        let btc = orchestrator.store().get("BTCUSDT").unwrap();
        assert!(btc.has_error);
        assert!(btc.ticker.is_none());
        assert!(btc.last_error.unwrap().starts_with("candles:"));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_cycles_replace_rather_than_accumulate() {
        let (catalog, _client, orchestrator) = setup(&["BTCUSDT", "ETHUSDT"]);
        let policy = IntervalPolicy::for_window(ObservationWindow::Long);

        orchestrator.run_cycle(&catalog, &policy).await;
        let first: Vec<_> = orchestrator
            .store()
            .snapshot()
            .into_iter()
            .map(|v| (v.state.series, v.state.ticker, v.state.has_error, v.state.loading))
            .collect();

        orchestrator.run_cycle(&catalog, &policy).await;
        let second: Vec<_> = orchestrator
            .store()
            .snapshot()
            .into_iter()
            .map(|v| (v.state.series, v.state.ticker, v.state.has_error, v.state.loading))
            .collect();

        assert_eq!(first, second);
        let series = second[0].0.as_ref().unwrap();
        assert_eq!(series.len(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failing_symbol_does_not_affect_neighbours() {
        let (catalog, client, orchestrator) = setup(&["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
        let policy = IntervalPolicy::for_window(ObservationWindow::Short);

        // Prime cached data for everyone.
        orchestrator.run_cycle(&catalog, &policy).await;
        let cached = orchestrator.store().get("ETHUSDT").unwrap();

        client.fail_ticker("ETHUSDT");
        orchestrator.run_cycle(&catalog, &policy).await;

        let store = orchestrator.store();
        let btc = store.get("BTCUSDT").unwrap();
        let eth = store.get("ETHUSDT").unwrap();
        let sol = store.get("SOLUSDT").unwrap();

        assert!(!btc.has_error && !sol.has_error);
        assert!(btc.last_updated >= cached.last_updated);
        assert!(sol.last_updated >= cached.last_updated);

        assert!(eth.has_error);
        assert!(!eth.loading);
        assert_eq!(eth.series, cached.series);
        assert_eq!(eth.ticker, cached.ticker);
        assert_eq!(eth.last_updated, cached.last_updated);
        assert!(eth.last_error.unwrap().starts_with("ticker:"));

        assert_eq!(store.recent_notifications().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_candle_result_is_a_symbol_error() {
        let (catalog, client, orchestrator) = setup(&["BTCUSDT"]);
        client.return_empty_candles("BTCUSDT");
        let policy = IntervalPolicy::for_window(ObservationWindow::Medium);

        let report = orchestrator.run_cycle(&catalog, &policy).await;
        assert_eq!(report.failed.len(), 1);

        let state = orchestrator.store().get("BTCUSDT").unwrap();
        assert!(state.has_error);
        assert!(state.series.is_none());
        assert!(state.last_error.unwrap().contains("no candles"));
        assert!(state.ticker.is_none());
        // The ticker is still requested after an empty result.
        let calls = client.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].is_candles() && !calls[1].is_candles());
    }

    #[tokio::test(start_paused = true)]
    async fn loading_is_set_only_while_fetching() {
        let (catalog, client, orchestrator) = setup(&["BTCUSDT", "ETHUSDT"]);
        client.set_latency(Duration::from_millis(100));
        let orchestrator = Arc::new(orchestrator);
        let policy = IntervalPolicy::for_window(ObservationWindow::Short);

        let task = {
            let orchestrator = orchestrator.clone();
            let catalog = catalog.clone();
            tokio::spawn(async move { orchestrator.run_cycle(&catalog, &policy).await })
        };

        // Mid BTC candle request.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(orchestrator.store().get("BTCUSDT").unwrap().loading);
        assert!(!orchestrator.store().get("ETHUSDT").unwrap().loading);

        // In the pacing gap after BTC (BTC done at 200 ms, ETH starts at 700 ms).
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!orchestrator.store().get("BTCUSDT").unwrap().loading);
        assert!(!orchestrator.store().get("ETHUSDT").unwrap().loading);

        task.await.unwrap();
        assert!(orchestrator.store().snapshot().iter().all(|v| !v.state.loading));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_leave_last_updated_untouched() {
        let (catalog, client, orchestrator) = setup(&["BTCUSDT"]);
        client.fail_candles("BTCUSDT");
        client.fail_ticker("BTCUSDT");
        let policy = IntervalPolicy::for_window(ObservationWindow::Medium);

        for _ in 0..3 {
            orchestrator.run_cycle(&catalog, &policy).await;
        }

        let state = orchestrator.store().get("BTCUSDT").unwrap();
        assert!(state.has_error);
        assert!(state.last_updated.is_none());
        assert!(state.series.is_none());
        assert!(state.last_error.unwrap().starts_with("candles:"));
        let calls = client.calls();
        let candle_calls = calls.iter().filter(|c: &&Call| c.is_candles()).count();
        assert_eq!(candle_calls, 3);
        assert_eq!(calls.len() - candle_calls, 3);
        assert_eq!(orchestrator.store().recent_notifications().len(), 3);
    }
}
