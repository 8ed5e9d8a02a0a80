//! Configuration for the advisor service.
//!
//! Loaded from YAML with per-section defaults, then overridden from the
//! environment for secrets and deployment-specific endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::types::MetricKey;
use crate::{Error, Result};

/// Smallest prompt limit that still fits every structural prompt field
pub const MIN_PROMPT_LEN: usize = 1024;

/// Longest evaluation deadline accepted (one day)
pub const MAX_EVALUATION_DEADLINE_SECS: u64 = 24 * 3600;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub advisory: AdvisoryConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
}

impl Config {
    /// Load configuration from a YAML file, apply environment overrides and
    /// validate the result
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env();
        config.validate()?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a YAML string without validating it
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Override secrets and endpoints from environment variables
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.advisory.api_key = Some(Secret::new(key));
            }
        }
        if let Ok(endpoint) = std::env::var("ADVISOR_ADVISORY_ENDPOINT") {
            self.advisory.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("ADVISOR_ADVISORY_MODEL") {
            self.advisory.model = model;
        }
        if let Ok(token) = std::env::var("PAGERDUTY_API_TOKEN") {
            if let Some(pd) = self.ingestion.pagerduty.as_mut() {
                pd.api_token = Some(Secret::new(token));
            }
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }

    /// Reject inconsistent configuration
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.store.retention_secs == 0 {
            errors.push("store.retention_secs must be greater than 0".to_string());
        }
        if self.store.max_samples_per_key == 0 || self.store.max_incidents == 0 {
            errors.push("store entry caps must be greater than 0".to_string());
        }
        if self.correlation.incident_threshold == 0 {
            errors.push("correlation.incident_threshold must be at least 1".to_string());
        }
        if self.correlation.lookback_secs == 0 {
            errors.push("correlation.lookback_secs must be greater than 0".to_string());
        }
        if self.correlation.lookback_secs > self.correlation.max_window_secs {
            errors.push(format!(
                "correlation.lookback_secs ({}) exceeds max_window_secs ({})",
                self.correlation.lookback_secs, self.correlation.max_window_secs
            ));
        }
        if self.correlation.lookback_secs > self.store.retention_secs {
            errors.push(format!(
                "correlation.lookback_secs ({}) exceeds store.retention_secs ({})",
                self.correlation.lookback_secs, self.store.retention_secs
            ));
        }
        if self.prompt.max_len < MIN_PROMPT_LEN {
            errors.push(format!(
                "prompt.max_len ({}) is below the minimum of {}",
                self.prompt.max_len, MIN_PROMPT_LEN
            ));
        }
        if self.advisory.endpoint.is_empty() {
            errors.push("advisory.endpoint must be set".to_string());
        }
        if self.advisory.max_attempts == 0 {
            errors.push("advisory.max_attempts must be at least 1".to_string());
        }
        if self.advisory.request_timeout_ms == 0 {
            errors.push("advisory.request_timeout_ms must be greater than 0".to_string());
        }
        if self.advisory.backoff_base_ms > self.advisory.backoff_max_ms {
            errors.push("advisory.backoff_base_ms exceeds backoff_max_ms".to_string());
        }
        if self.orchestrator.evaluation_interval_secs == 0 {
            errors.push("orchestrator.evaluation_interval_secs must be greater than 0".to_string());
        }
        if self.orchestrator.evaluation_deadline_secs == 0 {
            errors.push("orchestrator.evaluation_deadline_secs must be greater than 0".to_string());
        }
        if self.orchestrator.evaluation_deadline_secs > MAX_EVALUATION_DEADLINE_SECS {
            errors.push(format!(
                "orchestrator.evaluation_deadline_secs must be at most {}",
                MAX_EVALUATION_DEADLINE_SECS
            ));
        }
        if self.server.request_timeout_secs <= self.orchestrator.evaluation_deadline_secs {
            errors.push(format!(
                "server.request_timeout_secs ({}) must exceed orchestrator.evaluation_deadline_secs ({})",
                self.server.request_timeout_secs, self.orchestrator.evaluation_deadline_secs
            ));
        }
        if self.orchestrator.max_concurrent_requests == 0 {
            errors.push("orchestrator.max_concurrent_requests must be at least 1".to_string());
        }
        if let Some(prom) = &self.ingestion.prometheus {
            if prom.queries.is_empty() {
                errors.push("ingestion.prometheus.queries must not be empty".to_string());
            }
            for query in &prom.queries {
                if let Err(e) = query.metric_key.check() {
                    errors.push(format!("ingestion.prometheus.queries: {}", e));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::config(errors.join("; ")))
        }
    }
}

/// A secret value that never appears in debug output
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Reveal the secret for use in a request header
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 90,
        }
    }
}

/// Evidence store retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Entries older than this, relative to the newest entry seen, are evicted
    pub retention_secs: u64,
    /// Cap on samples kept per metric key
    pub max_samples_per_key: usize,
    /// Cap on incidents kept
    pub max_incidents: usize,
    /// How far ahead of the wall clock an observation may be stamped
    pub max_future_skew_secs: u64,
}

impl StoreConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn max_future_skew(&self) -> Duration {
        Duration::from_secs(self.max_future_skew_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention_secs: 6 * 3600,
            max_samples_per_key: 10_000,
            max_incidents: 10_000,
            max_future_skew_secs: 300,
        }
    }
}

/// Correlation policy parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Trailing window evaluated on each cycle
    pub lookback_secs: u64,
    /// Hard ceiling on any evidence window
    pub max_window_secs: u64,
    /// Incidents needed within the window to request advice
    pub incident_threshold: usize,
    /// Most recent incidents quoted in the evidence summary
    pub max_incident_excerpts: usize,
    /// Longest quoted incident excerpt, in characters
    pub excerpt_max_chars: usize,
}

impl CorrelationConfig {
    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_secs)
    }

    pub fn max_window(&self) -> Duration {
        Duration::from_secs(self.max_window_secs)
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            lookback_secs: 900,
            max_window_secs: 3600,
            incident_threshold: 3,
            max_incident_excerpts: 5,
            excerpt_max_chars: 160,
        }
    }
}

/// Prompt limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Maximum prompt size in bytes
    pub max_len: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self { max_len: 4000 }
    }
}

/// Request body shape expected by the advisory endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStyle {
    /// `{"messages": [...]}` with `choices[].message.content` responses
    Chat,
    /// Legacy `{"prompt": ...}` with `choices[].text` responses
    Completions,
}

/// Advisory (LLM) client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisoryConfig {
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub api_key: Option<Secret>,
    pub model: String,
    pub api_style: ApiStyle,
    pub max_tokens: u32,
    /// Timeout applied to each attempt
    pub request_timeout_ms: u64,
    /// Total attempts, first call included
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Upper bound of the random delay added to each backoff
    pub jitter_ms: u64,
}

impl AdvisoryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            api_style: ApiStyle::Chat,
            max_tokens: 150,
            request_timeout_ms: 15_000,
            max_attempts: 3,
            backoff_base_ms: 250,
            backoff_max_ms: 5_000,
            jitter_ms: 100,
        }
    }
}

/// Orchestrator scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Period of the timer-driven evaluation of every key
    pub evaluation_interval_secs: u64,
    /// Deadline for one evaluation, retries included
    pub evaluation_deadline_secs: u64,
    /// Evaluate a key as soon as evidence for it is ingested
    pub evaluate_on_ingest: bool,
    /// Advisory requests allowed in flight at once across all keys
    pub max_concurrent_requests: usize,
}

impl OrchestratorConfig {
    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    pub fn evaluation_deadline(&self) -> Duration {
        Duration::from_secs(self.evaluation_deadline_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 60,
            evaluation_deadline_secs: 60,
            evaluate_on_ingest: false,
            max_concurrent_requests: 8,
        }
    }
}

/// Ingestion feeds; each is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default)]
    pub prometheus: Option<PrometheusFeedConfig>,
    #[serde(default)]
    pub pagerduty: Option<PagerDutyFeedConfig>,
    #[serde(default)]
    pub synthetic: Option<SyntheticFeedConfig>,
}

/// One Prometheus instant query and the metric key its results are stored under
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusQuery {
    pub metric_key: MetricKey,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusFeedConfig {
    /// Base API URL, e.g. `http://prometheus:9090/api/v1`
    pub base_url: String,
    pub queries: Vec<PrometheusQuery>,
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagerDutyFeedConfig {
    #[serde(default = "default_pagerduty_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_token: Option<Secret>,
    /// Key attached to every incident from this feed; untagged when unset
    #[serde(default)]
    pub metric_key: Option<MetricKey>,
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticFeedConfig {
    #[serde(default = "default_synthetic_key")]
    pub metric_key: MetricKey,
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_pagerduty_url() -> String {
    "https://api.pagerduty.com".to_string()
}

fn default_synthetic_key() -> MetricKey {
    MetricKey::new("cpu_usage")
}
