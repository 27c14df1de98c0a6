pub mod binding;
pub mod broadcaster;
pub mod builder;
pub mod config;
pub mod db;
pub mod http;
pub mod metrics;
pub mod provider;
pub mod repo;
pub mod state;
pub mod ws_consumer;

pub use state::AppState;

use axum::{routing::get, Router};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/display/status/:token/", get(http::status::get_status))
        .route("/api/display/snapshot/:token/", get(http::snapshot::get_snapshot))
        .route("/api/display/ws-metrics/", get(http::ws_metrics::get_ws_metrics))
        .route("/ws/display/", get(ws_consumer::ws_consumer_handler))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .with_state(state)
}

mod health {
    use axum::{extract::State, http::StatusCode, response::IntoResponse};

    use crate::state::AppState;

    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }

    /// Readiness also probes the key-value store, since every request path
    /// (status, snapshot, binding) depends on it being reachable.
    pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
        match state.kv.get("readyz:probe").await {
            Ok(_) => (StatusCode::OK, "ok"),
            Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "kv store unreachable"),
        }
    }
}
