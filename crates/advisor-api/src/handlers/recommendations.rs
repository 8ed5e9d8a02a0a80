//! Evaluation and recommendation handlers
//!
//! - POST /api/v1/optimize/:metric_key - evaluate one key now
//! - GET /api/v1/recommendations - latest results for every key
//! - GET /api/v1/recommendations/:metric_key - latest result for one key
//! - GET /api/v1/stats - store and orchestrator counters

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use tracing::{info, instrument};

use llm_advisor_core::types::MetricKey;
use llm_advisor_orchestrator::{BoardEntry, EvaluationOutcome, OrchestratorStats};
use llm_advisor_storage::StoreStats;

use crate::{handlers::AppState, ApiError, SuccessResponse};

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub store: StoreStats,
    pub orchestrator: OrchestratorStats,
    pub recommendations: usize,
}

fn parse_key(raw: String) -> Result<MetricKey, ApiError> {
    let key = MetricKey::new(raw);
    key.check().map_err(ApiError::BadRequest)?;
    Ok(key)
}

/// POST /api/v1/optimize/:metric_key
///
/// The evaluation runs on its own task, so a request timeout or a client
/// disconnect does not stop it from reaching the sink.
#[instrument(skip(state))]
pub async fn optimize_threshold(
    State(state): State<AppState>,
    Path(metric_key): Path<String>,
) -> Result<Json<SuccessResponse<EvaluationOutcome>>, ApiError> {
    let key = parse_key(metric_key)?;
    let outcome = state
        .orchestrator
        .spawn_evaluate(key.clone())
        .await
        .map_err(|e| ApiError::Internal(format!("evaluation task failed: {}", e)))?;
    info!(metric_key = %key, "On-demand evaluation finished");

    match outcome {
        EvaluationOutcome::Skipped { state, .. } => Err(ApiError::Conflict(format!(
            "evaluation for {} already running ({})",
            key, state
        ))),
        EvaluationOutcome::Failed { kind, error, .. } => Err(ApiError::Upstream {
            kind,
            message: error,
        }),
        outcome => Ok(Json(SuccessResponse::new(outcome))),
    }
}

/// GET /api/v1/recommendations
pub async fn list_recommendations(
    State(state): State<AppState>,
) -> Json<SuccessResponse<Vec<BoardEntry>>> {
    Json(SuccessResponse::new(state.board.entries()))
}

/// GET /api/v1/recommendations/:metric_key
pub async fn get_recommendation(
    State(state): State<AppState>,
    Path(metric_key): Path<String>,
) -> Result<Json<SuccessResponse<BoardEntry>>, ApiError> {
    let key = parse_key(metric_key)?;
    state
        .board
        .get(&key)
        .map(|entry| Json(SuccessResponse::new(entry)))
        .ok_or_else(|| ApiError::NotFound(format!("no recommendation for {}", key)))
}

/// GET /api/v1/stats
pub async fn stats(State(state): State<AppState>) -> Json<SuccessResponse<StatsResponse>> {
    Json(SuccessResponse::new(StatsResponse {
        store: state.store.stats(),
        orchestrator: state.orchestrator.stats(),
        recommendations: state.board.len(),
    }))
}
