//! Evidence events flowing through the advisor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{IncidentId, MetricKey};
use crate::{Error, Result};

/// Longest incident description accepted at the store boundary
pub const MAX_INCIDENT_DESCRIPTION_LEN: usize = 8 * 1024;

/// A single observed metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric series name
    pub key: MetricKey,
    /// Observed value
    pub value: f64,
    /// Observation time
    pub observed_at: DateTime<Utc>,
}

impl MetricSample {
    /// Create a new sample
    pub fn new(key: impl Into<MetricKey>, value: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            value,
            observed_at,
        }
    }

    /// Validate the sample before it is stored
    pub fn validate(&self) -> Result<()> {
        self.key.check().map_err(Error::invalid_sample)?;
        check_timestamp(&self.observed_at)?;
        if !self.value.is_finite() {
            return Err(Error::invalid_sample(format!(
                "metric {} has non-finite value {}",
                self.key, self.value
            )));
        }
        Ok(())
    }
}

/// An incident as reported by an ingestion collaborator, before the store
/// assigns it an id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    /// Free-form incident description (untrusted)
    pub description: String,
    /// Observation time
    pub observed_at: DateTime<Utc>,
    /// Metric the incident was raised for, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_key: Option<MetricKey>,
}

impl IncidentReport {
    /// Create an incident not tied to any metric
    pub fn new(description: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            description: description.into(),
            observed_at,
            metric_key: None,
        }
    }

    /// Tie the incident to a metric key
    pub fn for_metric(mut self, key: impl Into<MetricKey>) -> Self {
        self.metric_key = Some(key.into());
        self
    }

    /// Validate the report before it is stored
    pub fn validate(&self) -> Result<()> {
        check_timestamp(&self.observed_at)?;
        if self.description.trim().is_empty() {
            return Err(Error::invalid_sample("incident description is empty"));
        }
        if self.description.len() > MAX_INCIDENT_DESCRIPTION_LEN {
            return Err(Error::invalid_sample(format!(
                "incident description is {} bytes, max {}",
                self.description.len(),
                MAX_INCIDENT_DESCRIPTION_LEN
            )));
        }
        if let Some(key) = &self.metric_key {
            key.check().map_err(Error::invalid_sample)?;
        }
        Ok(())
    }
}

/// A stored incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    /// Store-assigned id
    pub id: IncidentId,
    /// Free-form incident description (untrusted)
    pub description: String,
    /// Observation time
    pub observed_at: DateTime<Utc>,
    /// Metric the incident was raised for, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_key: Option<MetricKey>,
}

impl IncidentRecord {
    /// Build a record from a validated report
    pub fn from_report(id: IncidentId, report: IncidentReport) -> Self {
        Self {
            id,
            description: report.description,
            observed_at: report.observed_at,
            metric_key: report.metric_key,
        }
    }

    /// Whether this incident counts as evidence for `key`.
    ///
    /// Untagged incidents count for every key.
    pub fn concerns(&self, key: &MetricKey) -> bool {
        self.metric_key.as_ref().map_or(true, |k| k == key)
    }
}

/// Threshold-tuning advice returned by the advisory service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Unique recommendation id
    pub recommendation_id: Uuid,
    /// Metric the advice concerns
    pub metric_key: MetricKey,
    /// Advice text, exactly as returned by the service
    pub text: String,
    /// When the advisory request was issued
    pub requested_at: DateTime<Utc>,
    /// When the advice arrived
    pub completed_at: DateTime<Utc>,
}

impl Recommendation {
    /// Create a recommendation completed now
    pub fn new(metric_key: MetricKey, text: String, requested_at: DateTime<Utc>) -> Self {
        Self {
            recommendation_id: Uuid::new_v4(),
            metric_key,
            text,
            requested_at,
            completed_at: Utc::now(),
        }
    }
}

fn check_timestamp(ts: &DateTime<Utc>) -> Result<()> {
    if ts.timestamp() <= 0 {
        return Err(Error::invalid_sample(format!(
            "timestamp {} is not after the unix epoch",
            ts.to_rfc3339()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sample_validation() {
        let now = Utc::now();
        assert!(MetricSample::new("cpu_usage", 42.0, now).validate().is_ok());

        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        let err = MetricSample::new("cpu_usage", 42.0, epoch).validate();
        assert!(matches!(err, Err(Error::InvalidSample(_))));

        let before_epoch = Utc.timestamp_opt(-60, 0).unwrap();
        assert!(MetricSample::new("cpu_usage", 1.0, before_epoch).validate().is_err());

        assert!(MetricSample::new("cpu_usage", f64::NAN, now).validate().is_err());
        assert!(MetricSample::new("", 1.0, now).validate().is_err());
    }

    #[test]
    fn test_incident_validation() {
        let now = Utc::now();
        assert!(IncidentReport::new("disk full", now).validate().is_ok());
        assert!(IncidentReport::new("   ", now).validate().is_err());
        assert!(IncidentReport::new("x".repeat(MAX_INCIDENT_DESCRIPTION_LEN + 1), now)
            .validate()
            .is_err());
        assert!(IncidentReport::new("cpu alert", now)
            .for_metric("bad key")
            .validate()
            .is_err());
    }

    #[test]
    fn test_incident_concerns() {
        let now = Utc::now();
        let cpu = MetricKey::new("cpu_usage");
        let mem = MetricKey::new("mem_usage");

        let global = IncidentRecord::from_report(IncidentId::new(1), IncidentReport::new("page", now));
        assert!(global.concerns(&cpu));
        assert!(global.concerns(&mem));

        let tagged = IncidentRecord::from_report(
            IncidentId::new(2),
            IncidentReport::new("cpu alert", now).for_metric("cpu_usage"),
        );
        assert!(tagged.concerns(&cpu));
        assert!(!tagged.concerns(&mem));
    }
}
