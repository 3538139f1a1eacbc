// =============================================================================
// Central Application State — Coin Tracker
// =============================================================================
//
// Ties the subsystems together for the dashboard API and WebSocket feed. The
// state store and scheduler manage their own interior mutability; AppState
// only adds a control version for changes that do not touch the store (a
// window switch) and builds the unified snapshot.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::binance::{RateLimitSnapshot, RateLimitTracker};
use crate::refresh::{PollingScheduler, PollingState};
use crate::state_store::{Notification, SymbolStateStore, SymbolView};
use crate::types::ObservationWindow;

// =============================================================================
// Snapshot
// =============================================================================

/// Everything the dashboard renders, in one payload.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub polling: PollingState,
    pub symbols: Vec<SymbolView>,
    pub notifications: Vec<Notification>,
    pub rate_limits: RateLimitSnapshot,
}

// =============================================================================
// AppState
// =============================================================================

/// Shared handle bundle passed to every API handler via `Arc<AppState>`.
pub struct AppState {
    pub store: Arc<SymbolStateStore>,
    pub scheduler: PollingScheduler,
    pub rate_limits: Arc<RateLimitTracker>,

    /// Bumped on control changes that do not go through the store.
    control_version: AtomicU64,

    /// WebSocket message sequence number (incremented per message sent).
    pub ws_sequence_number: AtomicU64,

    /// Instant when the process was started. Used for uptime.
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        store: Arc<SymbolStateStore>,
        scheduler: PollingScheduler,
        rate_limits: Arc<RateLimitTracker>,
    ) -> Self {
        Self {
            store,
            scheduler,
            rate_limits,
            control_version: AtomicU64::new(0),
            ws_sequence_number: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
        }
    }

    /// Combined version of store data and control state. Changes whenever
    /// the dashboard snapshot would.
    pub fn current_state_version(&self) -> u64 {
        self.store.version() + self.control_version.load(Ordering::Acquire)
    }

    pub fn increment_version(&self) {
        self.control_version.fetch_add(1, Ordering::AcqRel);
    }

    /// Switch the observation window and mark the snapshot as changed.
    pub fn change_window(&self, window: ObservationWindow) {
        self.scheduler.change_window(window);
        self.increment_version();
    }

    pub fn build_snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            polling: self.scheduler.state(),
            symbols: self.store.snapshot(),
            notifications: self.store.recent_notifications(),
            rate_limits: self.rate_limits.snapshot(),
        }
    }
}
