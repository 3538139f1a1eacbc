// =============================================================================
// Coin Tracker — Main Entry Point
// =============================================================================
//
// Polls candles and 24h tickers for a fixed symbol catalog on a cadence set
// by the selected observation window, and serves the cached state to the
// dashboard over REST and WebSocket.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod binance;
mod catalog;
mod error;
mod market_data;
mod policy;
mod refresh;
mod runtime_config;
mod state_store;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::binance::{BinanceClient, RateLimitTracker};
use crate::refresh::{PollingScheduler, RefreshOrchestrator};
use crate::runtime_config::{TrackerConfig, DEFAULT_CONFIG_PATH};
use crate::state_store::SymbolStateStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Coin Tracker starting up");

    let config_path =
        std::env::var("TRACKER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = TrackerConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        TrackerConfig::default()
    });
    config.apply_env_overrides();

    // ── 2. Catalog & state store ─────────────────────────────────────────
    let catalog = Arc::new(config.catalog()?);
    if catalog.is_empty() {
        warn!("Symbol catalog is empty — refresh cycles will do nothing");
    }
    info!(
        symbols = ?catalog.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
        "Tracked symbols"
    );
    let store = Arc::new(SymbolStateStore::new(catalog.clone()));

    // ── 3. Provider client ───────────────────────────────────────────────
    let rate_limits = Arc::new(RateLimitTracker::new());
    let client = Arc::new(BinanceClient::new(
        &config.provider_base_url,
        config.request_timeout(),
        rate_limits.clone(),
    )?);
    info!(base_url = client.base_url(), "Market data client ready");

    // ── 4. Refresh pipeline ──────────────────────────────────────────────
    let orchestrator = Arc::new(RefreshOrchestrator::new(client, store.clone()));
    let scheduler = PollingScheduler::new(orchestrator, catalog, config.default_window);
    scheduler.start(config.default_window);

    let state = Arc::new(AppState::new(store, scheduler.clone(), rate_limits));

    // ── 5. API server ────────────────────────────────────────────────────
    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind API server on {addr}"))?;
    info!(addr = %addr, "API server listening");

    let app = api::router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            warn!("Shutdown signal received — stopping gracefully");
        })
        .await
        .context("API server failed")?;

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    scheduler.stop().await;
    info!("Coin Tracker shut down complete.");
    Ok(())
}
