//! Ingestion poller.
//!
//! Runs one polling loop per adapter. Each batch is appended to the store;
//! entries the store rejects are counted and logged, never retried.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use llm_advisor_core::types::MetricKey;
use llm_advisor_storage::EvidenceStorage;

use crate::adapters::{FeedAdapter, FeedBatch};

/// Called once per metric key touched by an ingested batch
pub type IngestHook = Arc<dyn Fn(&MetricKey) + Send + Sync>;

/// What one batch did to the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub metrics: usize,
    pub incidents: usize,
    pub rejected: usize,
    /// Keys that received a sample or a tagged incident
    pub keys: BTreeSet<MetricKey>,
}

/// Polls feed adapters into an evidence store
#[derive(Clone)]
pub struct IngestionPoller {
    store: Arc<dyn EvidenceStorage>,
    adapters: Vec<Arc<dyn FeedAdapter>>,
    hook: Option<IngestHook>,
}

impl fmt::Debug for IngestionPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.adapters.iter().map(|a| a.name()).collect();
        f.debug_struct("IngestionPoller")
            .field("adapters", &names)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl IngestionPoller {
    pub fn new(store: Arc<dyn EvidenceStorage>) -> Self {
        Self {
            store,
            adapters: Vec::new(),
            hook: None,
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn FeedAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn with_adapters(mut self, adapters: impl IntoIterator<Item = Arc<dyn FeedAdapter>>) -> Self {
        self.adapters.extend(adapters);
        self
    }

    pub fn with_hook(mut self, hook: IngestHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    /// Append a batch to the store and fire the hook for touched keys
    pub fn ingest(&self, source: &str, batch: FeedBatch) -> IngestSummary {
        let mut summary = IngestSummary::default();

        for sample in batch.metrics {
            let key = sample.key.clone();
            match self.store.append_metric(sample) {
                Ok(()) => {
                    summary.metrics += 1;
                    summary.keys.insert(key);
                }
                Err(e) => {
                    summary.rejected += 1;
                    warn!(source, metric_key = %key, error = %e, "Rejected metric sample");
                }
            }
        }

        for report in batch.incidents {
            let key = report.metric_key.clone();
            match self.store.append_incident(report) {
                Ok(id) => {
                    summary.incidents += 1;
                    if let Some(key) = key {
                        summary.keys.insert(key);
                    }
                    debug!(source, incident_id = %id, "Incident ingested");
                }
                Err(e) => {
                    summary.rejected += 1;
                    warn!(source, error = %e, "Rejected incident");
                }
            }
        }

        if let Some(hook) = &self.hook {
            for key in &summary.keys {
                hook(key);
            }
        }
        summary
    }

    /// Poll `adapter` once and ingest the result
    pub async fn poll_once(&self, adapter: &dyn FeedAdapter) -> llm_advisor_core::Result<IngestSummary> {
        let batch = adapter.poll().await?;
        Ok(self.ingest(adapter.name(), batch))
    }

    /// Start one polling task per adapter; tasks stop when `shutdown` turns true
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.adapters
            .iter()
            .cloned()
            .map(|adapter| {
                let poller = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { poller.poll_loop(adapter, shutdown).await })
            })
            .collect()
    }

    async fn poll_loop(self, adapter: Arc<dyn FeedAdapter>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(adapter.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            source = adapter.name(),
            interval_secs = adapter.interval().as_secs(),
            "Ingestion feed started"
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once(adapter.as_ref()).await {
                        Ok(summary) => debug!(
                            source = adapter.name(),
                            metrics = summary.metrics,
                            incidents = summary.incidents,
                            rejected = summary.rejected,
                            "Feed polled"
                        ),
                        Err(e) => warn!(source = adapter.name(), error = %e, "Feed poll failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(source = adapter.name(), "Ingestion feed stopped");
    }
}
