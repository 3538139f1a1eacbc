// =============================================================================
// Shared types used across the tracker
// =============================================================================

use serde::{Deserialize, Serialize};

// =============================================================================
// Symbol
// =============================================================================

/// Quote assets recognised when deriving a chart label from a symbol id.
const QUOTE_ASSETS: &[&str] = &["USDT", "USDC", "BUSD", "BTC", "ETH"];

/// A tracked instrument. Created once from configuration and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    /// Provider symbol id, e.g. "BTCUSDT".
    pub id: String,
    /// Human-readable name, e.g. "Bitcoin".
    pub display_name: String,
    /// Base asset ticker, e.g. "BTC".
    pub base_asset: String,
}

impl Symbol {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        base_asset: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            base_asset: base_asset.into(),
        }
    }

    /// Quote asset derived from the id suffix ("BTCUSDT" -> "USDT").
    pub fn quote_asset(&self) -> Option<&str> {
        let rest = self.id.strip_prefix(self.base_asset.as_str())?;
        QUOTE_ASSETS.iter().copied().find(|q| *q == rest)
    }

    /// Chart legend label, e.g. "Bitcoin (BTC/USDT)".
    pub fn label(&self) -> String {
        match self.quote_asset() {
            Some(quote) => format!("{} ({}/{})", self.display_name, self.base_asset, quote),
            None => format!("{} ({})", self.display_name, self.id),
        }
    }
}

// =============================================================================
// Observation window
// =============================================================================

/// User-selected observation window. Drives the interval policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObservationWindow {
    /// One day.
    Short,
    /// Seven days.
    Medium,
    /// Thirty days.
    Long,
}

impl Default for ObservationWindow {
    fn default() -> Self {
        Self::Medium
    }
}

impl ObservationWindow {
    pub const ALL: [ObservationWindow; 3] = [Self::Short, Self::Medium, Self::Long];

    /// Parse a raw selection. Returns `None` for anything unrecognised; see
    /// [`ObservationWindow::parse_or_default`] for the lenient variant.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "short" | "1" | "1d" => Some(Self::Short),
            "medium" | "7" | "7d" => Some(Self::Medium),
            "long" | "30" | "30d" => Some(Self::Long),
            _ => None,
        }
    }

    /// Parse a raw selection, falling back to `Medium` for unknown input.
    pub fn parse_or_default(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_default()
    }
}

impl std::fmt::Display for ObservationWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Short => write!(f, "Short"),
            Self::Medium => write!(f, "Medium"),
            Self::Long => write!(f, "Long"),
        }
    }
}

// =============================================================================
// Candle granularity
// =============================================================================

/// Candle width requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Granularity {
    /// Provider interval code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FifteenMinutes => "15m",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Candles
// =============================================================================

/// One OHLC point. `timestamp` is the candle open time in ms since epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandlePoint {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Direction of a series from its first close to its last close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
}

/// Candle history for one symbol, ordered by timestamp ascending.
///
/// Always replaced wholesale on refresh; there is no incremental merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandleSeries {
    points: Vec<CandlePoint>,
}

impl CandleSeries {
    /// Build a series, sorting points by timestamp.
    pub fn new(mut points: Vec<CandlePoint>) -> Self {
        points.sort_by_key(|p| p.timestamp);
        Self { points }
    }

    /// Keep only the most recent `count` points.
    pub fn truncated(mut self, count: usize) -> Self {
        let excess = self.points.len().saturating_sub(count);
        if excess > 0 {
            self.points.drain(..excess);
        }
        self
    }

    pub fn points(&self) -> &[CandlePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.points().last().map(|p| p.close)
    }

    /// `Up` when the first close is at or below the last close.
    pub fn trend(&self) -> Option<Trend> {
        let points = self.points();
        let first = points.first()?.close;
        let last = points.last()?.close;
        Some(if first <= last { Trend::Up } else { Trend::Down })
    }
}

// =============================================================================
// Ticker
// =============================================================================

/// Latest 24h ticker figures for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub last_price: f64,
    pub price_change_percent: f64,
    pub volume: f64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn point(timestamp: i64, close: f64) -> CandlePoint {
        CandlePoint {
            timestamp,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
        }
    }

    #[test]
    fn window_parsing_accepts_aliases() {
        assert_eq!(ObservationWindow::parse("1"), Some(ObservationWindow::Short));
        assert_eq!(ObservationWindow::parse("7d"), Some(ObservationWindow::Medium));
        assert_eq!(ObservationWindow::parse(" LONG "), Some(ObservationWindow::Long));
        assert_eq!(ObservationWindow::parse("90"), None);
    }

    #[test]
    fn unknown_window_falls_back_to_medium() {
        assert_eq!(ObservationWindow::parse_or_default(""), ObservationWindow::Medium);
        assert_eq!(ObservationWindow::parse_or_default("weekly"), ObservationWindow::Medium);
    }

    #[test]
    fn series_is_sorted_and_truncated_from_the_front() {
        let series = CandleSeries::new(vec![point(3, 3.0), point(1, 1.0), point(2, 2.0)]);
        let stamps: Vec<i64> = series.points().iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![1, 2, 3]);

        let series = series.truncated(2);
        assert_eq!(series.len(), 2);
        assert_eq!(series.points()[0].timestamp, 2);
        assert_eq!(series.last_close(), Some(3.0));
    }

    #[test]
    fn trend_compares_first_and_last_close() {
        assert_eq!(CandleSeries::default().trend(), None);
        let up = CandleSeries::new(vec![point(1, 10.0), point(2, 10.0)]);
        assert_eq!(up.trend(), Some(Trend::Up));
        let down = CandleSeries::new(vec![point(1, 10.0), point(2, 9.5)]);
        assert_eq!(down.trend(), Some(Trend::Down));
    }

    #[test]
    fn symbol_label_uses_quote_suffix() {
        let btc = Symbol::new("BTCUSDT", "Bitcoin", "BTC");
        assert_eq!(btc.quote_asset(), Some("USDT"));
        assert_eq!(btc.label(), "Bitcoin (BTC/USDT)");

        let odd = Symbol::new("XYZ-PERP", "Mystery", "XYZ");
        assert_eq!(odd.label(), "Mystery (XYZ-PERP)");
    }
}
