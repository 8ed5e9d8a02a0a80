//! Evaluation orchestrator.
//!
//! One evaluation of a key walks `Idle -> Evaluating -> RequestInFlight` and
//! back to `Idle`, passing through `Failed` when the advisory request ends in
//! an error. A key that is not `Idle` is skipped, so at most one advisory
//! request per key is ever outstanding. The result is published before the
//! gate is released.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};

use llm_advisor_client::{AdvisoryClient, AdvisoryError, AdvisoryTransport, AskContext};
use llm_advisor_core::{
    config::{Config, OrchestratorConfig},
    events::Recommendation,
    types::MetricKey,
    Result,
};
use llm_advisor_correlation::{CorrelationPolicy, PromptBuilder};
use llm_advisor_storage::EvidenceStorage;

use crate::gate::{GateState, KeyGates};
use crate::sink::ResultSink;

/// Result of one `evaluate` call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    /// Another evaluation of the key was already running
    Skipped {
        metric_key: MetricKey,
        state: GateState,
    },
    /// Evidence did not justify an advisory request
    NotTriggered {
        metric_key: MetricKey,
        sample_count: usize,
        incident_count: usize,
    },
    /// Advice was received and published
    Recommended { recommendation: Recommendation },
    /// The advisory request failed and the failure was published
    Failed {
        metric_key: MetricKey,
        kind: String,
        error: String,
    },
}

impl EvaluationOutcome {
    pub fn metric_key(&self) -> &MetricKey {
        match self {
            Self::Skipped { metric_key, .. }
            | Self::NotTriggered { metric_key, .. }
            | Self::Failed { metric_key, .. } => metric_key,
            Self::Recommended { recommendation } => &recommendation.metric_key,
        }
    }
}

/// Orchestrator counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub evaluations: u64,
    pub skipped: u64,
    pub not_triggered: u64,
    pub advisory_requests: u64,
    pub recommendations: u64,
    pub failures: u64,
    /// Keys currently being evaluated
    pub busy_keys: usize,
}

#[derive(Debug, Default)]
struct Counters {
    evaluations: AtomicU64,
    skipped: AtomicU64,
    not_triggered: AtomicU64,
    advisory_requests: AtomicU64,
    recommendations: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Coordinates store, policy, prompt builder, client and sink
pub struct Orchestrator {
    store: Arc<dyn EvidenceStorage>,
    policy: CorrelationPolicy,
    prompts: PromptBuilder,
    client: AdvisoryClient,
    sink: Arc<dyn ResultSink>,
    gates: KeyGates,
    evaluation_deadline: Duration,
    /// Advisory requests in flight across all keys
    request_slots: Semaphore,
    max_concurrent_requests: usize,
    shutdown: watch::Sender<bool>,
    counters: Counters,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("policy", &self.policy)
            .field("prompts", &self.prompts)
            .field("client", &self.client)
            .field("gates", &self.gates)
            .field("evaluation_deadline", &self.evaluation_deadline)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn EvidenceStorage>,
        policy: CorrelationPolicy,
        prompts: PromptBuilder,
        client: AdvisoryClient,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let max_concurrent_requests = OrchestratorConfig::default().max_concurrent_requests;
        Self {
            store,
            policy,
            prompts,
            client,
            sink,
            gates: KeyGates::new(),
            evaluation_deadline: OrchestratorConfig::default().evaluation_deadline(),
            request_slots: Semaphore::new(max_concurrent_requests),
            max_concurrent_requests,
            shutdown,
            counters: Counters::default(),
        }
    }

    /// Wire an orchestrator from validated configuration
    pub fn from_config(
        config: &Config,
        store: Arc<dyn EvidenceStorage>,
        transport: Arc<dyn AdvisoryTransport>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self> {
        let policy = CorrelationPolicy::new(config.correlation.clone())?;
        let prompts = PromptBuilder::from_config(&config.prompt)?;
        let client = AdvisoryClient::from_config(transport, &config.advisory);
        Ok(Self::new(store, policy, prompts, client, sink)
            .with_evaluation_deadline(config.orchestrator.evaluation_deadline())
            .with_max_concurrent_requests(config.orchestrator.max_concurrent_requests))
    }

    /// Deadline for one evaluation's advisory request, retries included
    pub fn with_evaluation_deadline(mut self, deadline: Duration) -> Self {
        self.evaluation_deadline = deadline;
        self
    }

    /// Cap advisory requests in flight across all keys (at least one)
    pub fn with_max_concurrent_requests(mut self, limit: usize) -> Self {
        let limit = limit.max(1);
        self.request_slots = Semaphore::new(limit);
        self.max_concurrent_requests = limit;
        self
    }

    pub fn store(&self) -> &Arc<dyn EvidenceStorage> {
        &self.store
    }

    pub fn gate_state(&self, metric_key: &MetricKey) -> GateState {
        self.gates.state(metric_key)
    }

    pub fn stats(&self) -> OrchestratorStats {
        let c = &self.counters;
        OrchestratorStats {
            evaluations: c.evaluations.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            not_triggered: c.not_triggered.load(Ordering::Relaxed),
            advisory_requests: c.advisory_requests.load(Ordering::Relaxed),
            recommendations: c.recommendations.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            busy_keys: self.gates.busy(),
        }
    }

    /// Cancel in-flight advisory requests and stop `run`
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Evaluate `metric_key` against the window ending now
    pub async fn evaluate(&self, metric_key: &MetricKey) -> EvaluationOutcome {
        self.evaluate_at(metric_key, Utc::now()).await
    }

    /// Evaluate `metric_key` against the window ending at `now`
    #[instrument(skip_all, fields(metric_key = %metric_key))]
    pub async fn evaluate_at(&self, metric_key: &MetricKey, now: DateTime<Utc>) -> EvaluationOutcome {
        Counters::bump(&self.counters.evaluations);

        let gate = match self.gates.try_acquire(metric_key) {
            Ok(gate) => gate,
            Err(state) => {
                Counters::bump(&self.counters.skipped);
                debug!(state = %state, "Evaluation already running, skipping");
                return EvaluationOutcome::Skipped {
                    metric_key: metric_key.clone(),
                    state,
                };
            }
        };

        let snapshot = self
            .store
            .snapshot_window(metric_key, self.policy.window_start(now));
        let decision = self
            .policy
            .decide(metric_key, &snapshot.metrics, &snapshot.incidents, now);

        if !decision.triggered {
            Counters::bump(&self.counters.not_triggered);
            return EvaluationOutcome::NotTriggered {
                metric_key: metric_key.clone(),
                sample_count: decision.evidence.sample_count,
                incident_count: decision.evidence.incident_count,
            };
        }

        gate.set(GateState::RequestInFlight);
        Counters::bump(&self.counters.advisory_requests);
        let prompt = self.prompts.build(&decision.evidence);
        info!(
            samples = decision.evidence.sample_count,
            incidents = decision.evidence.incident_count,
            prompt_len = prompt.len(),
            "Requesting threshold advice"
        );

        let ctx = AskContext::from_signal(self.shutdown.subscribe())
            .with_timeout(self.evaluation_deadline);
        let requested_at = Utc::now();

        let outcome = match self.ask_bounded(&ctx, &prompt).await {
            Ok(text) => {
                let recommendation = Recommendation::new(metric_key.clone(), text, requested_at);
                self.sink.publish(&recommendation).await;
                Counters::bump(&self.counters.recommendations);
                EvaluationOutcome::Recommended { recommendation }
            }
            Err(e) => {
                gate.set(GateState::Failed);
                self.sink.publish_failure(metric_key, &e).await;
                Counters::bump(&self.counters.failures);
                EvaluationOutcome::Failed {
                    metric_key: metric_key.clone(),
                    kind: e.kind().to_string(),
                    error: e.to_string(),
                }
            }
        };

        drop(gate);
        outcome
    }

    /// Wait for a request slot, then ask. Waiting counts against `ctx`.
    async fn ask_bounded(
        &self,
        ctx: &AskContext,
        prompt: &str,
    ) -> std::result::Result<String, AdvisoryError> {
        let _permit = tokio::select! {
            biased;
            _ = ctx.done() => return Err(AdvisoryError::Cancelled),
            permit = self.request_slots.acquire() => {
                permit.map_err(|_| AdvisoryError::Cancelled)?
            }
        };
        self.client.ask(ctx, prompt).await
    }

    /// Evaluate `metric_key` on a background task
    pub fn spawn_evaluate(self: &Arc<Self>, metric_key: MetricKey) -> JoinHandle<EvaluationOutcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.evaluate(&metric_key).await })
    }

    /// Evaluate every stored key concurrently against the window ending now
    pub async fn evaluate_all(self: &Arc<Self>) -> Vec<EvaluationOutcome> {
        self.evaluate_all_at(Utc::now()).await
    }

    /// Evaluate every stored key concurrently.
    ///
    /// Keys are started in lexicographic order and outcomes are returned in
    /// the same order.
    pub async fn evaluate_all_at(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<EvaluationOutcome> {
        let keys = self.store.metric_keys();
        let mut tasks = JoinSet::new();
        for (index, key) in keys.iter().cloned().enumerate() {
            let this = Arc::clone(self);
            tasks.spawn(async move { (index, this.evaluate_at(&key, now).await) });
        }

        let mut slots: Vec<Option<EvaluationOutcome>> = vec![None; keys.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => error!(error = %e, "Evaluation task failed"),
            }
        }
        slots.into_iter().flatten().collect()
    }

    /// Drop sink results for keys the store no longer holds
    pub async fn prune_results(&self) {
        let live = self.store.metric_keys();
        self.sink.retain(&live).await;
    }

    /// Evaluate every key each `interval` until `shutdown` is called
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return;
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "Orchestrator started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcomes = self.evaluate_all().await;
                    let triggered = outcomes
                        .iter()
                        .filter(|o| matches!(o, EvaluationOutcome::Recommended { .. } | EvaluationOutcome::Failed { .. }))
                        .count();
                    debug!(keys = outcomes.len(), triggered, "Evaluation cycle complete");
                    self.prune_results().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        break;
                    }
                }
            }
        }
        info!("Orchestrator stopped");
    }
}
