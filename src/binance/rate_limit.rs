// =============================================================================
// Request-Weight Tracker — observes Binance API usage
// =============================================================================
//
// Binance caps public REST usage at 6000 request weight per minute per IP and
// reports the running total in the `X-MBX-USED-WEIGHT-1M` response header.
//
// The tracker only observes: refresh pacing is fixed and does not adapt to
// these numbers. The counter is atomic so the health endpoint can read it
// without locking.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::{debug, warn};

/// Provider-side per-minute weight ceiling.
const WEIGHT_LIMIT_1M: u32 = 6000;
/// Weight above which every update logs a warning.
const WEIGHT_WARN_THRESHOLD: u32 = 4800;

/// Lock-free tracker of the provider's reported request weight.
pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
    responses_seen: AtomicU64,
}

/// Serialisable view of the tracker for the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub used_weight_1m: u32,
    pub weight_limit_1m: u32,
    pub responses_seen: u64,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
            responses_seen: AtomicU64::new(0),
        }
    }

    /// Update from the headers of any provider response.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        self.responses_seen.fetch_add(1, Ordering::Relaxed);

        let Some(weight) = headers
            .get("X-MBX-USED-WEIGHT-1M")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        else {
            return;
        };
        self.record_weight(weight);
    }

    /// Store a new weight reading.
    pub fn record_weight(&self, weight: u32) {
        let prev = self.used_weight_1m.swap(weight, Ordering::Relaxed);
        if weight >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
            warn!(
                used_weight = weight,
                limit = WEIGHT_LIMIT_1M,
                "provider request weight crossed warning threshold"
            );
        } else if weight >= WEIGHT_WARN_THRESHOLD {
            warn!(used_weight = weight, "provider request weight remains high");
        }
        debug!(used_weight_1m = weight, "request weight updated from header");
    }

    /// Whether the last reading sits at or above the warning threshold.
    pub fn is_near_limit(&self) -> bool {
        self.used_weight_1m.load(Ordering::Relaxed) >= WEIGHT_WARN_THRESHOLD
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            used_weight_1m: self.used_weight_1m.load(Ordering::Relaxed),
            weight_limit_1m: WEIGHT_LIMIT_1M,
            responses_seen: self.responses_seen.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &self.used_weight_1m.load(Ordering::Relaxed))
            .field("responses_seen", &self.responses_seen.load(Ordering::Relaxed))
            .finish()
    }
}
