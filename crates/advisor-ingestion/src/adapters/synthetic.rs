//! Synthetic metric feed.
//!
//! Emits one uniformly random percentage in `[0, 100)`, rounded to two
//! decimals, per poll. Useful for local runs without a Prometheus server.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::time::Duration;

use llm_advisor_core::{
    config::SyntheticFeedConfig, events::MetricSample, types::MetricKey, Result,
};

use super::{FeedAdapter, FeedBatch};

#[derive(Debug, Clone)]
pub struct SyntheticFeed {
    metric_key: MetricKey,
    interval: Duration,
}

impl SyntheticFeed {
    pub fn new(config: &SyntheticFeedConfig) -> Self {
        Self {
            metric_key: config.metric_key.clone(),
            interval: Duration::from_secs(config.interval_secs.max(1)),
        }
    }

    fn next_value() -> f64 {
        let raw: f64 = rand::thread_rng().gen_range(0.0..100.0);
        (raw * 100.0).round() / 100.0
    }
}

#[async_trait]
impl FeedAdapter for SyntheticFeed {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll(&self) -> Result<FeedBatch> {
        Ok(FeedBatch {
            metrics: vec![MetricSample::new(
                self.metric_key.clone(),
                Self::next_value(),
                Utc::now(),
            )],
            incidents: Vec::new(),
        })
    }
}
