//! Correlation policy.
//!
//! Triggers when, inside the lookback window, a metric key has at least
//! `incident_threshold` incidents and at least one sample of its own. The
//! evidence summary is rendered through one fixed template; incident text
//! only enters it as sanitized, length-capped excerpts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::debug;

use llm_advisor_core::{
    config::CorrelationConfig,
    events::{IncidentRecord, MetricSample},
    types::{chrono_span, MetricKey},
    Error, Result,
};

/// Derived summary of correlated activity for one key over one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub metric_key: MetricKey,
    pub sample_count: usize,
    pub incident_count: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub summary_text: String,
}

/// Outcome of one policy evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub evidence: Evidence,
    pub triggered: bool,
}

/// Decides when evidence justifies an advisory request
#[derive(Debug, Clone)]
pub struct CorrelationPolicy {
    config: CorrelationConfig,
}

impl CorrelationPolicy {
    /// Create a policy, rejecting unusable parameters
    pub fn new(config: CorrelationConfig) -> Result<Self> {
        if config.incident_threshold == 0 {
            return Err(Error::config("incident_threshold must be at least 1"));
        }
        if config.lookback_secs == 0 {
            return Err(Error::config("lookback_secs must be greater than 0"));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Start of the window ending at `now`; never more than `max_window` back
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let span = self.config.lookback().min(self.config.max_window());
        now - chrono_span(span)
    }

    /// Evaluate the evidence for `metric_key` in the window ending at `now`.
    ///
    /// Entries outside the window, samples of other keys, and incidents tied
    /// to other keys are ignored, so callers may pass a wider snapshot.
    pub fn decide(
        &self,
        metric_key: &MetricKey,
        metrics: &[MetricSample],
        incidents: &[IncidentRecord],
        now: DateTime<Utc>,
    ) -> Decision {
        let start = self.window_start(now);
        let in_window = |at: &DateTime<Utc>| *at >= start && *at <= now;

        let samples: Vec<&MetricSample> = metrics
            .iter()
            .filter(|s| &s.key == metric_key && in_window(&s.observed_at))
            .collect();
        let related: Vec<&IncidentRecord> = incidents
            .iter()
            .filter(|i| i.concerns(metric_key) && in_window(&i.observed_at))
            .collect();

        let triggered = !samples.is_empty() && related.len() >= self.config.incident_threshold;

        debug!(
            metric_key = %metric_key,
            samples = samples.len(),
            incidents = related.len(),
            threshold = self.config.incident_threshold,
            triggered,
            "Correlation decided"
        );

        Decision {
            evidence: Evidence {
                metric_key: metric_key.clone(),
                sample_count: samples.len(),
                incident_count: related.len(),
                window_start: start,
                window_end: now,
                summary_text: self.summarize(metric_key, &samples, &related, start, now),
            },
            triggered,
        }
    }

    fn summarize(
        &self,
        metric_key: &MetricKey,
        samples: &[&MetricSample],
        incidents: &[&IncidentRecord],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> String {
        let stats = ValueStats::of(samples);
        let mut out = String::new();

        // Writing to a String cannot fail
        let _ = writeln!(out, "metric: {}", metric_key);
        let _ = writeln!(out, "window: {} to {}", start.to_rfc3339(), end.to_rfc3339());
        let _ = writeln!(
            out,
            "samples: {} (min {}, max {}, mean {}, latest {})",
            samples.len(),
            fmt_value(stats.map(|s| s.min)),
            fmt_value(stats.map(|s| s.max)),
            fmt_value(stats.map(|s| s.mean)),
            fmt_value(stats.map(|s| s.latest)),
        );
        let _ = writeln!(
            out,
            "incidents: {} (threshold {})",
            incidents.len(),
            self.config.incident_threshold
        );
        let _ = writeln!(out, "recent incidents:");

        let skip = incidents.len().saturating_sub(self.config.max_incident_excerpts);
        for incident in &incidents[skip..] {
            let _ = writeln!(
                out,
                "- #{} at {}: \"{}\"",
                incident.id,
                incident.observed_at.to_rfc3339(),
                excerpt(&incident.description, self.config.excerpt_max_chars)
            );
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
struct ValueStats {
    min: f64,
    max: f64,
    mean: f64,
    latest: f64,
}

impl ValueStats {
    fn of(samples: &[&MetricSample]) -> Option<Self> {
        let last = samples.last()?;
        let (min, max, sum) = samples.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(min, max, sum), s| (min.min(s.value), max.max(s.value), sum + s.value),
        );
        Some(Self {
            min,
            max,
            mean: sum / samples.len() as f64,
            latest: last.value,
        })
    }
}

fn fmt_value(v: Option<f64>) -> String {
    v.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}", v))
}

/// Single-line, quote-free, length-capped rendering of untrusted text
fn excerpt(text: &str, max_chars: usize) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| match c {
            '"' | '`' => '\'',
            '<' | '>' => ' ',
            c if c.is_control() || c.is_whitespace() => ' ',
            c => c,
        })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let mut cut: String = collapsed.chars().take(max_chars.saturating_sub(3)).collect();
        cut.push_str("...");
        cut
    }
}
