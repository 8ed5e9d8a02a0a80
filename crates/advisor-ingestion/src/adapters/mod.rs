//! # Feed Adapters
//!
//! Thin consumes-from integrations. Each adapter fetches one batch of
//! evidence per `poll` and converts it into core events; the poller owns
//! scheduling and storage.

pub mod pagerduty;
pub mod prometheus;
pub mod synthetic;

pub use pagerduty::PagerDutyAdapter;
pub use prometheus::PrometheusAdapter;
pub use synthetic::SyntheticFeed;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use llm_advisor_core::{
    config::IngestionConfig,
    events::{IncidentReport, MetricSample},
    Result,
};

/// Evidence fetched by one poll
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedBatch {
    pub metrics: Vec<MetricSample>,
    pub incidents: Vec<IncidentReport>,
}

impl FeedBatch {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.incidents.is_empty()
    }
}

/// Common trait for all feeds
#[async_trait]
pub trait FeedAdapter: Send + Sync {
    /// Adapter name for logging
    fn name(&self) -> &'static str;

    /// How often the adapter should be polled
    fn interval(&self) -> Duration;

    /// Fetch the next batch of evidence
    async fn poll(&self) -> Result<FeedBatch>;
}

/// Build the adapters enabled in `config`
pub fn from_config(config: &IngestionConfig) -> Result<Vec<Arc<dyn FeedAdapter>>> {
    let mut adapters: Vec<Arc<dyn FeedAdapter>> = Vec::new();
    if let Some(prometheus) = &config.prometheus {
        adapters.push(Arc::new(PrometheusAdapter::new(prometheus)?));
    }
    if let Some(pagerduty) = &config.pagerduty {
        adapters.push(Arc::new(PagerDutyAdapter::new(pagerduty)?));
    }
    if let Some(synthetic) = &config.synthetic {
        adapters.push(Arc::new(SyntheticFeed::new(synthetic)));
    }
    Ok(adapters)
}

/// Shared HTTP client settings for polling adapters
pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| llm_advisor_core::Error::http(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_advisor_core::config::{PagerDutyFeedConfig, SyntheticFeedConfig};
    use llm_advisor_core::types::MetricKey;

    #[test]
    fn test_from_config_builds_enabled_feeds() {
        let config = IngestionConfig {
            prometheus: None,
            pagerduty: Some(PagerDutyFeedConfig {
                base_url: "http://localhost:1".to_string(),
                api_token: None,
                metric_key: None,
                interval_secs: 60,
            }),
            synthetic: Some(SyntheticFeedConfig {
                metric_key: MetricKey::new("cpu_usage"),
                interval_secs: 30,
            }),
        };
        let adapters = from_config(&config).unwrap();
        let names: Vec<&str> = adapters.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["pagerduty", "synthetic"]);
    }

    #[test]
    fn test_from_config_empty() {
        assert!(from_config(&IngestionConfig::default()).unwrap().is_empty());
    }
}
