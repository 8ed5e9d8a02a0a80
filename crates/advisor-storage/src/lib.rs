//! # Advisor Storage
//!
//! In-memory evidence layer for the LLM threshold advisor.
//!
//! This crate provides:
//! - `EvidenceStore`: lock-guarded, bounded buffers of metric samples and
//!   incidents with copy-on-read window snapshots
//! - `EvidenceStorage`: the seam the orchestrator and API read and write through

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod store;

use chrono::{DateTime, Utc};
use llm_advisor_core::{
    events::{IncidentRecord, IncidentReport, MetricSample},
    types::{IncidentId, MetricKey},
    Result,
};
use serde::Serialize;

pub use store::EvidenceStore;

/// Independent copy of the evidence for one metric key since a point in time.
///
/// Both vectors are ordered by `observed_at` ascending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceSnapshot {
    pub metric_key: MetricKey,
    pub since: DateTime<Utc>,
    pub metrics: Vec<MetricSample>,
    pub incidents: Vec<IncidentRecord>,
}

/// Store sizes and eviction counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub metric_keys: usize,
    pub metric_samples: usize,
    pub incidents: usize,
    pub evicted_samples: u64,
    pub evicted_incidents: u64,
    /// Newest observation time the store has seen
    pub watermark: Option<DateTime<Utc>>,
}

/// Trait for evidence backends
pub trait EvidenceStorage: Send + Sync {
    /// Append a metric sample
    fn append_metric(&self, sample: MetricSample) -> Result<()>;

    /// Append an incident, returning the id the store assigned to it
    fn append_incident(&self, report: IncidentReport) -> Result<IncidentId>;

    /// Copy the evidence for `metric_key` observed at or after `since`
    fn snapshot_window(&self, metric_key: &MetricKey, since: DateTime<Utc>) -> EvidenceSnapshot;

    /// Metric keys with stored samples, in ascending lexicographic order
    fn metric_keys(&self) -> Vec<MetricKey>;

    /// Current sizes and counters
    fn stats(&self) -> StoreStats;
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::store::EvidenceStore;
    pub use crate::{EvidenceSnapshot, EvidenceStorage, StoreStats};
}
