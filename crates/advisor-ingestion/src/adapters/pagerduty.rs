//! # PagerDuty Adapter
//!
//! Lists incidents from the PagerDuty REST API (v2) and turns each new one
//! into an `IncidentReport`. Incidents already seen are not reported again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use llm_advisor_core::{
    config::{PagerDutyFeedConfig, Secret},
    events::IncidentReport,
    types::MetricKey,
    Error, Result,
};

use super::{http_client, FeedAdapter, FeedBatch};

const ACCEPT_V2: &str = "application/vnd.pagerduty+json;version=2";

/// Incident ids remembered for de-duplication
const SEEN_CAPACITY: usize = 10_000;

#[derive(Debug, Deserialize)]
struct IncidentList {
    #[serde(default)]
    incidents: Vec<PagerDutyIncident>,
}

#[derive(Debug, Deserialize)]
struct PagerDutyIncident {
    id: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl PagerDutyIncident {
    fn text(&self) -> String {
        match self.description.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() && d != self.summary => {
                format!("{} ({}): {}", self.summary, self.status, d)
            }
            _ => format!("{} ({})", self.summary, self.status),
        }
    }
}

#[derive(Debug, Default)]
struct Seen {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl Seen {
    /// Returns true the first time `id` is observed
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > SEEN_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
        true
    }
}

/// PagerDuty incident feed
#[derive(Debug)]
pub struct PagerDutyAdapter {
    client: Client,
    base_url: String,
    api_token: Option<Secret>,
    metric_key: Option<MetricKey>,
    interval: Duration,
    seen: Mutex<Seen>,
}

impl PagerDutyAdapter {
    pub fn new(config: &PagerDutyFeedConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(Error::config("pagerduty base_url must be set"));
        }
        Ok(Self {
            client: http_client()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            metric_key: config.metric_key.clone(),
            interval: Duration::from_secs(config.interval_secs.max(1)),
            seen: Mutex::new(Seen::default()),
        })
    }

    async fn list_incidents(&self) -> Result<Vec<PagerDutyIncident>> {
        let mut request = self
            .client
            .get(format!("{}/incidents", self.base_url))
            .header(reqwest::header::ACCEPT, ACCEPT_V2);
        if let Some(token) = &self.api_token {
            request = request.header(
                reqwest::header::AUTHORIZATION,
                format!("Token token={}", token.expose()),
            );
        }

        let response = request.send().await.map_err(|e| Error::http(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::upstream("pagerduty", status.as_u16(), body));
        }

        let list: IncidentList = serde_json::from_str(&body)?;
        Ok(list.incidents)
    }
}

#[async_trait]
impl FeedAdapter for PagerDutyAdapter {
    fn name(&self) -> &'static str {
        "pagerduty"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll(&self) -> Result<FeedBatch> {
        let incidents = self.list_incidents().await?;
        let total = incidents.len();

        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let incidents: Vec<IncidentReport> = incidents
            .into_iter()
            .filter(|i| seen.insert(&i.id))
            .map(|i| {
                let report = IncidentReport::new(i.text(), i.created_at.unwrap_or_else(Utc::now));
                match &self.metric_key {
                    Some(key) => report.for_metric(key.clone()),
                    None => report,
                }
            })
            .collect();
        drop(seen);

        debug!(total, new = incidents.len(), "PagerDuty incidents polled");
        Ok(FeedBatch {
            metrics: Vec::new(),
            incidents,
        })
    }
}
