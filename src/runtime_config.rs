// =============================================================================
// Runtime Configuration — tracker settings loaded at start-up
// =============================================================================
//
// All fields carry `#[serde(default)]` so that a partial (or empty) JSON file
// still loads; anything missing takes the built-in value.
//
// =============================================================================

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::binance::client::DEFAULT_BASE_URL;
use crate::catalog::SymbolCatalog;
use crate::types::{ObservationWindow, Symbol};

/// Config file read when `TRACKER_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "tracker_config.json";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<Symbol> {
    [
        ("BTCUSDT", "Bitcoin", "BTC"),
        ("ETHUSDT", "Ethereum", "ETH"),
        ("SOLUSDT", "Solana", "SOL"),
        ("TONUSDT", "TON", "TON"),
        ("DOGEUSDT", "DOGE", "DOGE"),
        ("XRPUSDT", "XRP", "XRP"),
        ("TRUMPUSDT", "TRUMP", "TRUMP"),
    ]
    .into_iter()
    .map(|(id, name, base)| Symbol::new(id, name, base))
    .collect()
}

fn default_provider_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

// =============================================================================
// TrackerConfig
// =============================================================================

/// Top-level configuration for the tracker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Tracked symbols, in refresh order.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<Symbol>,

    /// Window polling starts with.
    #[serde(default)]
    pub default_window: ObservationWindow,

    /// REST base URL of the market data provider.
    #[serde(default = "default_provider_base_url")]
    pub provider_base_url: String,

    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Address the dashboard API listens on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            default_window: ObservationWindow::default(),
            provider_base_url: default_provider_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// Errors are returned so the caller can fall back to defaults with a
    /// warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read tracker config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse tracker config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = config.symbols.len(),
            default_window = %config.default_window,
            "tracker config loaded"
        );

        Ok(config)
    }

    /// Apply `TRACKER_BIND_ADDR` if set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("TRACKER_BIND_ADDR") {
            if !addr.trim().is_empty() {
                self.bind_addr = addr.trim().to_string();
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_addr
            .parse()
            .with_context(|| format!("invalid bind address '{}'", self.bind_addr))
    }

    /// Validated symbol catalog.
    pub fn catalog(&self) -> Result<SymbolCatalog> {
        SymbolCatalog::new(self.symbols.clone()).context("invalid symbol list in tracker config")
    }
}
