// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. The tracker is read-mostly: the only
// write is the observation window selection.
//
// CORS is configured permissively for the local dashboard.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::binance::RateLimitSnapshot;
use crate::policy::IntervalPolicy;
use crate::refresh::PollingState;
use crate::types::ObservationWindow;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/symbols", get(symbols))
        .route("/api/v1/symbols/:id", get(symbol_detail))
        .route("/api/v1/window", get(get_window).post(set_window))
        .route("/api/v1/notifications", get(notifications))
        // ── WebSocket (handled separately in ws module but mounted here) ─
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    state_version: u64,
    server_time: i64,
    uptime_secs: u64,
    rate_limits: RateLimitSnapshot,
    near_rate_limit: bool,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        rate_limits: state.rate_limits.snapshot(),
        near_rate_limit: state.rate_limits.is_near_limit(),
    };
    Json(resp)
}

// =============================================================================
// Full state snapshot
// =============================================================================

async fn full_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

// =============================================================================
// Symbols
// =============================================================================

async fn symbols(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.snapshot())
}

async fn symbol_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.view(&id) {
        Some(view) => Json(view).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("Unknown symbol: '{id}'") })),
        )
            .into_response(),
    }
}

// =============================================================================
// Observation window
// =============================================================================

#[derive(Serialize)]
struct WindowResponse {
    policy: IntervalPolicy,
    polling: PollingState,
}

#[derive(Deserialize)]
struct WindowRequest {
    window: Option<String>,
}

fn window_response(state: &AppState) -> WindowResponse {
    let polling = state.scheduler.state();
    WindowResponse {
        policy: IntervalPolicy::for_window(polling.window),
        polling,
    }
}

async fn get_window(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(window_response(&state))
}

async fn set_window(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WindowRequest>,
) -> impl IntoResponse {
    let raw = req.window.as_deref();
    if raw.and_then(ObservationWindow::parse).is_none() {
        warn!(raw = ?raw, "Unrecognised window selection — using default");
    }
    let window = IntervalPolicy::resolve(raw).window;

    state.change_window(window);
    info!(window = %window, "Observation window changed via API");

    Json(window_response(&state))
}

// =============================================================================
// Notifications
// =============================================================================

async fn notifications(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.recent_notifications())
}
