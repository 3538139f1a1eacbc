// =============================================================================
// Interval Policy — observation window -> request shape + refresh period
// =============================================================================
//
//   window   granularity   candles   refresh
//   Short    15m           96        30 s
//   Medium   4h            42        60 s
//   Long     1d            30        300 s
//
// Consumed by the orchestrator (candle request) and the scheduler (timer).
// =============================================================================

use std::time::Duration;

use serde::Serialize;

use crate::types::{Granularity, ObservationWindow};

/// Request shape and refresh cadence for one observation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntervalPolicy {
    pub window: ObservationWindow,
    pub granularity: Granularity,
    pub candle_count: u32,
    #[serde(serialize_with = "serialize_secs")]
    pub refresh_period: Duration,
}

impl IntervalPolicy {
    pub fn for_window(window: ObservationWindow) -> Self {
        let (granularity, candle_count, period_secs) = match window {
            ObservationWindow::Short => (Granularity::FifteenMinutes, 96, 30),
            ObservationWindow::Medium => (Granularity::FourHours, 42, 60),
            ObservationWindow::Long => (Granularity::OneDay, 30, 300),
        };
        Self {
            window,
            granularity,
            candle_count,
            refresh_period: Duration::from_secs(period_secs),
        }
    }

    /// Resolve a raw, possibly missing selection. Anything unrecognised maps
    /// to the `Medium` row.
    pub fn resolve(raw: Option<&str>) -> Self {
        let window = raw
            .map(ObservationWindow::parse_or_default)
            .unwrap_or_default();
        Self::for_window(window)
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}
