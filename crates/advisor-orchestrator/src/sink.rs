//! Result sinks.
//!
//! Every evaluation that reaches the advisory service ends in exactly one
//! `publish` or `publish_failure` call on the configured sink.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use llm_advisor_client::AdvisoryError;
use llm_advisor_core::{events::Recommendation, types::MetricKey};

/// Receives the outcome of advisory requests
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Publish advice for a metric key
    async fn publish(&self, recommendation: &Recommendation);

    /// Publish a terminal advisory failure for a metric key
    async fn publish_failure(&self, metric_key: &MetricKey, error: &AdvisoryError);

    /// Forget results for keys outside `live_keys` (sorted ascending)
    async fn retain(&self, _live_keys: &[MetricKey]) {}
}

/// Writes results to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ResultSink for LogSink {
    async fn publish(&self, recommendation: &Recommendation) {
        info!(
            metric_key = %recommendation.metric_key,
            recommendation_id = %recommendation.recommendation_id,
            latency_ms = (recommendation.completed_at - recommendation.requested_at).num_milliseconds(),
            recommendation = %recommendation.text,
            "Threshold recommendation received"
        );
    }

    async fn publish_failure(&self, metric_key: &MetricKey, error: &AdvisoryError) {
        warn!(
            metric_key = %metric_key,
            kind = error.kind(),
            error = %error,
            "Threshold recommendation failed"
        );
    }
}

/// A failed advisory request, as kept on the board
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub kind: String,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

/// Latest results for one metric key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardEntry {
    pub metric_key: MetricKey,
    pub latest: Option<Recommendation>,
    pub last_failure: Option<FailureRecord>,
    pub updated_at: DateTime<Utc>,
}

impl BoardEntry {
    fn new(metric_key: MetricKey) -> Self {
        Self {
            metric_key,
            latest: None,
            last_failure: None,
            updated_at: Utc::now(),
        }
    }
}

/// Keeps the latest recommendation and failure per key for the API
#[derive(Debug, Default)]
pub struct RecommendationBoard {
    entries: DashMap<MetricKey, BoardEntry>,
}

impl RecommendationBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, metric_key: &MetricKey) -> Option<BoardEntry> {
        self.entries.get(metric_key).map(|e| e.value().clone())
    }

    /// All entries, ordered by metric key
    pub fn entries(&self) -> Vec<BoardEntry> {
        let mut entries: Vec<BoardEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.metric_key.cmp(&b.metric_key));
        entries
    }

    /// Drop entries whose key is not in `live_keys` (sorted ascending);
    /// returns how many were dropped
    pub fn retain_keys(&self, live_keys: &[MetricKey]) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|key, _| live_keys.binary_search(key).is_ok());
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ResultSink for RecommendationBoard {
    async fn publish(&self, recommendation: &Recommendation) {
        let mut entry = self
            .entries
            .entry(recommendation.metric_key.clone())
            .or_insert_with(|| BoardEntry::new(recommendation.metric_key.clone()));
        entry.latest = Some(recommendation.clone());
        entry.updated_at = recommendation.completed_at;
    }

    async fn publish_failure(&self, metric_key: &MetricKey, error: &AdvisoryError) {
        let now = Utc::now();
        let mut entry = self
            .entries
            .entry(metric_key.clone())
            .or_insert_with(|| BoardEntry::new(metric_key.clone()));
        entry.last_failure = Some(FailureRecord {
            kind: error.kind().to_string(),
            message: error.to_string(),
            failed_at: now,
        });
        entry.updated_at = now;
    }

    async fn retain(&self, live_keys: &[MetricKey]) {
        let dropped = self.retain_keys(live_keys);
        if dropped > 0 {
            debug!(dropped, "Pruned recommendations for expired keys");
        }
    }
}

/// Forwards every result to each inner sink in order
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[async_trait]
impl ResultSink for FanoutSink {
    async fn publish(&self, recommendation: &Recommendation) {
        for sink in &self.sinks {
            sink.publish(recommendation).await;
        }
    }

    async fn publish_failure(&self, metric_key: &MetricKey, error: &AdvisoryError) {
        for sink in &self.sinks {
            sink.publish_failure(metric_key, error).await;
        }
    }

    async fn retain(&self, live_keys: &[MetricKey]) {
        for sink in &self.sinks {
            sink.retain(live_keys).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recommendation(key: &str, text: &str) -> Recommendation {
        Recommendation::new(MetricKey::new(key), text.to_string(), Utc::now())
    }

    #[tokio::test]
    async fn test_board_keeps_latest_and_failure() {
        let board = RecommendationBoard::new();
        let key = MetricKey::new("cpu_usage");

        board.publish(&recommendation("cpu_usage", "first")).await;
        board.publish(&recommendation("cpu_usage", "second")).await;
        board
            .publish_failure(&key, &AdvisoryError::transport("HTTP 503"))
            .await;

        let entry = board.get(&key).unwrap();
        assert_eq!(entry.latest.unwrap().text, "second");
        let failure = entry.last_failure.unwrap();
        assert_eq!(failure.kind, "transport");
        assert!(failure.message.contains("HTTP 503"));
    }

    #[tokio::test]
    async fn test_board_drops_expired_keys() {
        let board = Arc::new(RecommendationBoard::new());
        board.publish(&recommendation("cpu_usage", "a")).await;
        board.publish(&recommendation("old_key", "b")).await;
        board
            .publish_failure(&MetricKey::new("typo_key"), &AdvisoryError::Cancelled)
            .await;

        let fanout = FanoutSink::new().with(Arc::new(LogSink)).with(board.clone());
        let live = vec![MetricKey::new("cpu_usage"), MetricKey::new("mem_usage")];
        fanout.retain(&live).await;

        assert_eq!(board.len(), 1);
        assert!(board.get(&MetricKey::new("cpu_usage")).is_some());
        assert_eq!(board.retain_keys(&live), 0);
    }

    #[tokio::test]
    async fn test_board_entries_sorted() {
        let board = RecommendationBoard::new();
        board.publish(&recommendation("mem_usage", "a")).await;
        board.publish(&recommendation("cpu_usage", "b")).await;
        board.publish(&recommendation("disk_io", "c")).await;

        let keys: Vec<String> = board
            .entries()
            .into_iter()
            .map(|e| e.metric_key.to_string())
            .collect();
        assert_eq!(keys, vec!["cpu_usage", "disk_io", "mem_usage"]);
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_sink() {
        let first = Arc::new(RecommendationBoard::new());
        let second = Arc::new(RecommendationBoard::new());
        let fanout = FanoutSink::new()
            .with(first.clone())
            .with(second.clone())
            .with(Arc::new(LogSink));
        assert_eq!(fanout.len(), 3);

        fanout.publish(&recommendation("cpu_usage", "x")).await;
        fanout
            .publish_failure(&MetricKey::new("mem_usage"), &AdvisoryError::Cancelled)
            .await;

        for board in [first, second] {
            assert!(board.get(&MetricKey::new("cpu_usage")).unwrap().latest.is_some());
            assert_eq!(
                board.get(&MetricKey::new("mem_usage")).unwrap().last_failure.unwrap().kind,
                "cancelled"
            );
        }
    }

    #[test]
    fn test_board_entry_serializes() {
        let entry = BoardEntry::new(MetricKey::new("cpu_usage"));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["metric_key"], "cpu_usage");
        assert!(json["latest"].is_null());
    }
}
