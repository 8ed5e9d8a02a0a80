//! # Prometheus Adapter
//!
//! Runs the configured instant queries against the Prometheus HTTP API and
//! stores every returned series value under the query's metric key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use llm_advisor_core::{
    config::{PrometheusFeedConfig, PrometheusQuery},
    events::MetricSample,
    Error, Result,
};

use super::{http_client, FeedAdapter, FeedBatch};

/// `/api/v1/query` response
#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<Series>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    /// `[unix_seconds, "value"]`
    value: (f64, String),
}

/// Prometheus instant-query feed
#[derive(Debug, Clone)]
pub struct PrometheusAdapter {
    client: Client,
    base_url: String,
    queries: Vec<PrometheusQuery>,
    interval: Duration,
}

impl PrometheusAdapter {
    pub fn new(config: &PrometheusFeedConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(Error::config("prometheus base_url must be set"));
        }
        Ok(Self {
            client: http_client()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            queries: config.queries.clone(),
            interval: Duration::from_secs(config.interval_secs.max(1)),
        })
    }

    async fn run_query(&self, query: &PrometheusQuery) -> Result<Vec<MetricSample>> {
        let url = format!("{}/query", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("query", query.query.as_str())])
            .send()
            .await
            .map_err(|e| Error::http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::upstream("prometheus", status.as_u16(), body));
        }

        let parsed: QueryResponse = serde_json::from_str(&body)?;
        if parsed.status != "success" {
            return Err(Error::upstream(
                "prometheus",
                status.as_u16(),
                parsed.error.unwrap_or(parsed.status),
            ));
        }

        let data = parsed.data.unwrap_or(QueryData {
            result_type: "vector".to_string(),
            result: Vec::new(),
        });
        if data.result_type != "vector" {
            warn!(
                query = %query.query,
                result_type = %data.result_type,
                "Prometheus query did not return an instant vector"
            );
            return Ok(Vec::new());
        }

        Ok(data
            .result
            .into_iter()
            .filter_map(|series| to_sample(query, series))
            .collect())
    }
}

fn to_sample(query: &PrometheusQuery, series: Series) -> Option<MetricSample> {
    let (ts, raw) = series.value;
    let value = match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => {
            debug!(metric_key = %query.metric_key, value = %raw, labels = ?series.metric, "Skipping non-finite series value");
            return None;
        }
    };
    let observed_at = DateTime::<Utc>::from_timestamp_millis((ts * 1000.0) as i64)?;
    Some(MetricSample::new(query.metric_key.clone(), value, observed_at))
}

#[async_trait]
impl FeedAdapter for PrometheusAdapter {
    fn name(&self) -> &'static str {
        "prometheus"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll(&self) -> Result<FeedBatch> {
        let mut batch = FeedBatch::default();
        for query in &self.queries {
            match self.run_query(query).await {
                Ok(samples) => batch.metrics.extend(samples),
                Err(e) => warn!(query = %query.query, error = %e, "Prometheus query failed"),
            }
        }
        Ok(batch)
    }
}
