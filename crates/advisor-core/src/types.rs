//! Domain identifiers.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::time::Duration;

/// Convert a std duration to a chrono span, saturating at one century
pub fn chrono_span(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Longest metric key accepted at the store boundary
pub const MAX_METRIC_KEY_LEN: usize = 128;

/// Name of a metric series, e.g. `cpu_usage`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricKey(String);

impl MetricKey {
    /// Wrap a key without validating it
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the key is usable as a store index and prompt field.
    ///
    /// Keys must be non-empty, at most [`MAX_METRIC_KEY_LEN`] bytes, and free
    /// of whitespace and control characters.
    pub fn check(&self) -> Result<(), String> {
        if self.0.is_empty() {
            return Err("metric key is empty".to_string());
        }
        if self.0.len() > MAX_METRIC_KEY_LEN {
            return Err(format!(
                "metric key is {} bytes, max {}",
                self.0.len(),
                MAX_METRIC_KEY_LEN
            ));
        }
        if self.0.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(format!("metric key {:?} contains whitespace or control characters", self.0));
        }
        Ok(())
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MetricKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for MetricKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MetricKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for MetricKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Store-assigned incident identifier, strictly increasing per store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(u64);

impl IncidentId {
    /// Create from a raw value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
