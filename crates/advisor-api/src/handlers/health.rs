//! GET /health

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;

use crate::{handlers::AppState, SuccessResponse};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
    pub metric_keys: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<SuccessResponse<HealthResponse>> {
    let status = if state.orchestrator.is_shut_down() {
        "shutting_down"
    } else {
        "healthy"
    };
    Json(SuccessResponse::new(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        metric_keys: state.store.stats().metric_keys,
    }))
}
