//! Ingestion handlers
//!
//! - POST /api/v1/ingest/metric
//! - POST /api/v1/ingest/incident

use axum::{extract::rejection::JsonRejection, extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use llm_advisor_core::{
    events::{IncidentReport, MetricSample},
    types::MetricKey,
};

use crate::{handlers::AppState, ApiError, SuccessResponse};

/// A metric value sent either as a JSON number or a numeric string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    fn parse(&self) -> Result<f64, ApiError> {
        match self {
            Self::Number(v) => Ok(*v),
            Self::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("invalid metric value: {:?}", s))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestMetricRequest {
    pub metric_key: String,
    pub value: MetricValue,
    /// Defaults to the time of receipt
    #[serde(default, alias = "timestamp")]
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestIncidentRequest {
    pub description: String,
    #[serde(default)]
    pub metric_key: Option<String>,
    #[serde(default, alias = "timestamp")]
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_key: Option<MetricKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<u64>,
}

fn invalid_body(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(format!("Invalid request data: {}", rejection.body_text()))
}

/// POST /api/v1/ingest/metric
#[instrument(skip_all)]
pub async fn ingest_metric(
    State(state): State<AppState>,
    body: Result<Json<IngestMetricRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse<IngestResponse>>, ApiError> {
    let Json(request) = body.map_err(invalid_body)?;
    let key = MetricKey::new(request.metric_key);
    let sample = MetricSample::new(
        key.clone(),
        request.value.parse()?,
        request.observed_at.unwrap_or_else(Utc::now),
    );
    state.store.append_metric(sample)?;
    debug!(metric_key = %key, "Metric ingested");

    if state.evaluate_on_ingest {
        state.orchestrator.spawn_evaluate(key.clone());
    }

    Ok(Json(SuccessResponse::new(IngestResponse {
        message: "Metric ingested successfully".to_string(),
        metric_key: Some(key),
        incident_id: None,
    })))
}

/// POST /api/v1/ingest/incident
#[instrument(skip_all)]
pub async fn ingest_incident(
    State(state): State<AppState>,
    body: Result<Json<IngestIncidentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SuccessResponse<IngestResponse>>), ApiError> {
    let Json(request) = body.map_err(invalid_body)?;
    let mut report = IncidentReport::new(
        request.description,
        request.observed_at.unwrap_or_else(Utc::now),
    );
    if let Some(key) = request.metric_key {
        report = report.for_metric(key);
    }
    let key = report.metric_key.clone();
    let id = state.store.append_incident(report)?;
    debug!(incident_id = %id, "Incident ingested");

    if let (true, Some(key)) = (state.evaluate_on_ingest, &key) {
        state.orchestrator.spawn_evaluate(key.clone());
    }

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::new(IngestResponse {
            message: "Incident ingested successfully".to_string(),
            metric_key: key,
            incident_id: Some(id.get()),
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_value_forms() {
        let v: MetricValue = serde_json::from_str("87.5").unwrap();
        assert_eq!(v.parse().unwrap(), 87.5);

        let v: MetricValue = serde_json::from_str("\" 42.10 \"").unwrap();
        assert_eq!(v.parse().unwrap(), 42.1);

        let v: MetricValue = serde_json::from_str("\"high\"").unwrap();
        assert!(v.parse().is_err());
    }
}
