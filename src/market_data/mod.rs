// =============================================================================
// Market data provider contract
// =============================================================================

use async_trait::async_trait;

use crate::error::FetchError;
use crate::types::{CandleSeries, Granularity, TickerSnapshot};

/// Source of ticker and candle data for a single symbol.
///
/// Implementations do not retry: a failed call is reported once and the next
/// scheduled refresh cycle is the retry.
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    async fn fetch_ticker(&self, symbol: &str) -> Result<TickerSnapshot, FetchError>;

    async fn fetch_candles(
        &self,
        symbol: &str,
        granularity: Granularity,
        count: u32,
    ) -> Result<CandleSeries, FetchError>;
}
