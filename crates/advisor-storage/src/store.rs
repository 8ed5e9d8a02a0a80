//! Lock-guarded evidence buffers.
//!
//! Writers serialize on a single `RwLock`; readers take the read lock only
//! for as long as it takes to copy the requested window out. Retention is
//! enforced lazily on append, relative to the newest observation seen (the
//! watermark). The wall clock is only consulted to refuse observations
//! stamped too far in the future.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

use llm_advisor_core::{
    config::StoreConfig,
    events::{IncidentRecord, IncidentReport, MetricSample},
    types::{chrono_span, IncidentId, MetricKey},
    Error, Result,
};

use crate::{EvidenceSnapshot, EvidenceStorage, StoreStats};

/// Appends between full retention sweeps over every metric key
const SWEEP_EVERY_APPENDS: u64 = 1024;

/// Bounded, concurrency-safe metric and incident buffers
#[derive(Debug)]
pub struct EvidenceStore {
    config: StoreConfig,
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    metrics: BTreeMap<MetricKey, VecDeque<MetricSample>>,
    incidents: VecDeque<IncidentRecord>,
    last_incident_id: u64,
    watermark: Option<DateTime<Utc>>,
    appends_since_sweep: u64,
    evicted_samples: u64,
    evicted_incidents: u64,
}

trait Observed {
    fn observed_at(&self) -> DateTime<Utc>;
}

impl Observed for MetricSample {
    fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

impl Observed for IncidentRecord {
    fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

/// Insert keeping `observed_at` order; equal timestamps keep arrival order
fn insert_ordered<T: Observed>(buf: &mut VecDeque<T>, item: T) {
    let at = item.observed_at();
    match buf.back() {
        Some(last) if last.observed_at() > at => {
            let idx = buf.partition_point(|e| e.observed_at() <= at);
            buf.insert(idx, item);
        }
        _ => buf.push_back(item),
    }
}

/// Drop entries older than `cutoff` and beyond `cap`; returns how many went
fn evict<T: Observed>(buf: &mut VecDeque<T>, cutoff: Option<DateTime<Utc>>, cap: usize) -> u64 {
    let mut evicted = 0;
    if let Some(cutoff) = cutoff {
        while buf.front().is_some_and(|e| e.observed_at() < cutoff) {
            buf.pop_front();
            evicted += 1;
        }
    }
    while buf.len() > cap {
        buf.pop_front();
        evicted += 1;
    }
    evicted
}

/// Copy out entries at or after `since`
fn copy_since<T: Observed + Clone>(buf: &VecDeque<T>, since: DateTime<Utc>) -> Vec<T> {
    let start = buf.partition_point(|e| e.observed_at() < since);
    buf.range(start..).cloned().collect()
}

impl EvidenceStore {
    /// Create an empty store
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Create with default retention
    pub fn with_defaults() -> Self {
        Self::new(StoreConfig::default())
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject observations stamped further ahead of the clock than the
    /// configured skew, so the watermark never runs past the present
    fn check_not_future(&self, at: DateTime<Utc>) -> Result<()> {
        let limit = Utc::now() + chrono_span(self.config.max_future_skew());
        if at > limit {
            return Err(Error::invalid_sample(format!(
                "timestamp {} is more than {}s ahead of the clock",
                at.to_rfc3339(),
                self.config.max_future_skew_secs
            )));
        }
        Ok(())
    }

    fn cutoff(&self, watermark: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        watermark.map(|w| w - chrono_span(self.config.retention()))
    }

    /// Advance the watermark and decide whether a full sweep is due
    fn observe(&self, inner: &mut Inner, at: DateTime<Utc>) -> bool {
        if inner.watermark.map_or(true, |w| at > w) {
            inner.watermark = Some(at);
        }
        inner.appends_since_sweep += 1;
        inner.appends_since_sweep >= SWEEP_EVERY_APPENDS
    }

    /// Evict expired entries everywhere and forget empty keys
    fn sweep(&self, inner: &mut Inner) {
        let cutoff = self.cutoff(inner.watermark);
        let cap = self.config.max_samples_per_key;
        let mut evicted = 0;
        for buf in inner.metrics.values_mut() {
            evicted += evict(buf, cutoff, cap);
        }
        let before = inner.metrics.len();
        inner.metrics.retain(|_, buf| !buf.is_empty());
        inner.evicted_samples += evicted;
        inner.evicted_incidents += evict(&mut inner.incidents, cutoff, self.config.max_incidents);
        inner.appends_since_sweep = 0;
        if evicted > 0 || before != inner.metrics.len() {
            debug!(
                evicted,
                dropped_keys = before - inner.metrics.len(),
                "Evidence store sweep"
            );
        }
    }
}

impl Default for EvidenceStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl EvidenceStorage for EvidenceStore {
    fn append_metric(&self, sample: MetricSample) -> Result<()> {
        sample.validate()?;
        self.check_not_future(sample.observed_at)?;

        let mut inner = self.write();
        let sweep_due = self.observe(&mut inner, sample.observed_at);
        let cutoff = self.cutoff(inner.watermark);
        let cap = self.config.max_samples_per_key;

        let key = sample.key.clone();
        let buf = inner.metrics.entry(key.clone()).or_default();
        insert_ordered(buf, sample);
        let evicted = evict(buf, cutoff, cap);
        if buf.is_empty() {
            inner.metrics.remove(&key);
        }
        inner.evicted_samples += evicted;

        if sweep_due {
            self.sweep(&mut inner);
        }
        trace!(metric_key = %key, evicted, "Metric appended");
        Ok(())
    }

    fn append_incident(&self, report: IncidentReport) -> Result<IncidentId> {
        report.validate()?;
        self.check_not_future(report.observed_at)?;

        let mut inner = self.write();
        let sweep_due = self.observe(&mut inner, report.observed_at);
        let cutoff = self.cutoff(inner.watermark);

        inner.last_incident_id += 1;
        let id = IncidentId::new(inner.last_incident_id);
        insert_ordered(&mut inner.incidents, IncidentRecord::from_report(id, report));
        let evicted = evict(&mut inner.incidents, cutoff, self.config.max_incidents);
        inner.evicted_incidents += evicted;

        if sweep_due {
            self.sweep(&mut inner);
        }
        trace!(incident_id = %id, evicted, "Incident appended");
        Ok(id)
    }

    fn snapshot_window(&self, metric_key: &MetricKey, since: DateTime<Utc>) -> EvidenceSnapshot {
        let inner = self.read();
        let metrics = inner
            .metrics
            .get(metric_key)
            .map(|buf| copy_since(buf, since))
            .unwrap_or_default();
        let start = inner.incidents.partition_point(|i| i.observed_at < since);
        let incidents = inner
            .incidents
            .range(start..)
            .filter(|i| i.concerns(metric_key))
            .cloned()
            .collect();

        EvidenceSnapshot {
            metric_key: metric_key.clone(),
            since,
            metrics,
            incidents,
        }
    }

    fn metric_keys(&self) -> Vec<MetricKey> {
        self.read().metrics.keys().cloned().collect()
    }

    fn stats(&self) -> StoreStats {
        let inner = self.read();
        StoreStats {
            metric_keys: inner.metrics.len(),
            metric_samples: inner.metrics.values().map(VecDeque::len).sum(),
            incidents: inner.incidents.len(),
            evicted_samples: inner.evicted_samples,
            evicted_incidents: inner.evicted_incidents,
            watermark: inner.watermark,
        }
    }
}
