// =============================================================================
// Symbol State Store — per-symbol series, ticker and status flags
// =============================================================================
//
// Single writer, many readers. The refresh orchestrator is the only code that
// calls the write methods, and cycles never overlap, so writes never contend.
// The RwLock exists because readers (API handlers) run on other worker
// threads.
//
// Readers may see a cycle half-applied: some symbols already refreshed, some
// not yet. That window is accepted.
//
// Change notification is explicit: a monotonically increasing version counter
// plus a broadcast channel of `StoreEvent`s.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::catalog::SymbolCatalog;
use crate::error::RefreshError;
use crate::types::{CandleSeries, Symbol, TickerSnapshot, Trend};

/// Maximum number of failure notifications retained.
const MAX_RECENT_NOTIFICATIONS: usize = 50;
/// Buffered events per subscriber before it starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// State records
// =============================================================================

/// Everything known about one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SymbolState {
    /// Last successfully fetched candle series.
    pub series: Option<CandleSeries>,
    /// Last successfully fetched ticker.
    pub ticker: Option<TickerSnapshot>,
    /// True only while this symbol's fetch is in flight.
    pub loading: bool,
    /// Set by a failed fetch, cleared only by this symbol's next success.
    pub has_error: bool,
    /// Time of the last fully successful fetch.
    pub last_updated: Option<DateTime<Utc>>,
    /// Cause of the most recent failure, cleared with `has_error`.
    pub last_error: Option<String>,
}

/// Transient per-symbol failure notice for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub symbol: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Pushed to subscribers on every write.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A symbol's state changed.
    Updated { symbol: String, version: u64 },
    /// A symbol's refresh failed.
    Failed(Notification),
}

/// Read model of one catalog entry, in the shape the dashboard consumes.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolView {
    pub symbol: Symbol,
    pub label: String,
    pub trend: Option<Trend>,
    pub state: SymbolState,
}

// =============================================================================
// SymbolStateStore
// =============================================================================

pub struct SymbolStateStore {
    catalog: Arc<SymbolCatalog>,
    states: RwLock<HashMap<String, SymbolState>>,
    notifications: RwLock<VecDeque<Notification>>,
    version: AtomicU64,
    events: broadcast::Sender<StoreEvent>,
}

impl SymbolStateStore {
    /// Create a store with an empty state for every catalog entry.
    pub fn new(catalog: Arc<SymbolCatalog>) -> Self {
        let states = catalog
            .iter()
            .map(|s| (s.id.clone(), SymbolState::default()))
            .collect();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            catalog,
            states: RwLock::new(states),
            notifications: RwLock::new(VecDeque::with_capacity(MAX_RECENT_NOTIFICATIONS)),
            version: AtomicU64::new(1),
            events,
        }
    }

    // ── Reads ───────────────────────────────────────────────────────────

    pub fn get(&self, symbol: &str) -> Option<SymbolState> {
        self.states.read().get(symbol).cloned()
    }

    /// One view per catalog entry, in catalog order.
    pub fn snapshot(&self) -> Vec<SymbolView> {
        let states = self.states.read();
        self.catalog
            .iter()
            .map(|symbol| {
                let state = states.get(&symbol.id).cloned().unwrap_or_default();
                SymbolView {
                    label: symbol.label(),
                    trend: state.series.as_ref().and_then(CandleSeries::trend),
                    symbol: symbol.clone(),
                    state,
                }
            })
            .collect()
    }

    pub fn view(&self, symbol: &str) -> Option<SymbolView> {
        let entry = self.catalog.get(symbol)?;
        let state = self.get(symbol)?;
        Some(SymbolView {
            label: entry.label(),
            trend: state.series.as_ref().and_then(CandleSeries::trend),
            symbol: entry.clone(),
            state,
        })
    }

    /// Most recent failure notifications, oldest first.
    pub fn recent_notifications(&self) -> Vec<Notification> {
        self.notifications.read().iter().cloned().collect()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    // ── Writes (orchestrator only) ──────────────────────────────────────

    /// Mark a fetch as started.
    pub fn begin_fetch(&self, symbol: &str) {
        self.mutate(symbol, |state| state.loading = true);
    }

    /// Replace series and ticker and clear the error flag.
    pub fn record_success(
        &self,
        symbol: &str,
        series: CandleSeries,
        ticker: TickerSnapshot,
        at: DateTime<Utc>,
    ) {
        self.mutate(symbol, |state| {
            state.series = Some(series);
            state.ticker = Some(ticker);
            state.has_error = false;
            state.last_error = None;
            state.last_updated = Some(at);
        });
    }

    /// Flag a failure. Cached series/ticker and `last_updated` are kept.
    pub fn record_failure(&self, symbol: &str, error: &RefreshError, at: DateTime<Utc>) {
        let message = error.to_string();
        let applied = self.mutate(symbol, |state| {
            state.has_error = true;
            state.last_error = Some(message.clone());
        });
        if !applied {
            return;
        }

        let notification = Notification {
            symbol: symbol.to_string(),
            message,
            at,
        };
        {
            let mut recent = self.notifications.write();
            recent.push_back(notification.clone());
            while recent.len() > MAX_RECENT_NOTIFICATIONS {
                recent.pop_front();
            }
        }
        let _ = self.events.send(StoreEvent::Failed(notification));
    }

    /// Mark a fetch as finished, whatever its outcome.
    pub fn finish_fetch(&self, symbol: &str) {
        self.mutate(symbol, |state| state.loading = false);
    }

    /// Apply `f` to a symbol's state, bump the version and notify. Returns
    /// false for ids outside the catalog.
    fn mutate(&self, symbol: &str, f: impl FnOnce(&mut SymbolState)) -> bool {
        {
            let mut states = self.states.write();
            let Some(state) = states.get_mut(symbol) else {
                warn!(symbol, "write for symbol outside the catalog ignored");
                return false;
            };
            f(state);
        }
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.events.send(StoreEvent::Updated {
            symbol: symbol.to_string(),
            version,
        });
        true
    }
}

impl std::fmt::Debug for SymbolStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolStateStore")
            .field("symbols", &self.catalog.len())
            .field("version", &self.version())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
