//! End-to-end evaluation scenarios against counting stub transports.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use llm_advisor_client::{AdvisoryError, AdvisoryTransport};
use llm_advisor_core::{
    config::Config,
    events::{IncidentReport, MetricSample},
    types::MetricKey,
};
use llm_advisor_orchestrator::{
    EvaluationOutcome, FanoutSink, GateState, LogSink, Orchestrator, RecommendationBoard,
};
use llm_advisor_storage::{EvidenceStorage, EvidenceStore};

/// Returns a fixed reply, counting calls and recording prompts
struct CountingStub {
    reply: Result<String, AdvisoryError>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl CountingStub {
    fn new(reply: Result<String, AdvisoryError>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdvisoryTransport for CountingStub {
    async fn complete(&self, prompt: &str) -> Result<String, AdvisoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone()
    }
}

/// Blocks every call until released
struct BlockingStub {
    calls: AtomicUsize,
    release: Notify,
}

#[async_trait]
impl AdvisoryTransport for BlockingStub {
    async fn complete(&self, _prompt: &str) -> Result<String, AdvisoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        Ok("Hold at 80%".to_string())
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.correlation.incident_threshold = 3;
    config.advisory.max_attempts = 3;
    config.advisory.request_timeout_ms = 1_000;
    config.advisory.backoff_base_ms = 1;
    config.advisory.backoff_max_ms = 5;
    config.advisory.jitter_ms = 1;
    config.orchestrator.evaluation_deadline_secs = 10;
    config.validate().unwrap();
    config
}

fn build(
    transport: Arc<dyn AdvisoryTransport>,
) -> (Arc<Orchestrator>, Arc<EvidenceStore>, Arc<RecommendationBoard>) {
    let config = config();
    let store = Arc::new(EvidenceStore::new(config.store.clone()));
    let board = Arc::new(RecommendationBoard::new());
    let sink = FanoutSink::new().with(Arc::new(LogSink)).with(board.clone());
    let orchestrator =
        Orchestrator::from_config(&config, store.clone(), transport, Arc::new(sink)).unwrap();
    (Arc::new(orchestrator), store, board)
}

fn ingest_cpu_evidence(store: &EvidenceStore, incidents: usize) {
    let now = Utc::now();
    for i in 0..incidents {
        store
            .append_incident(
                IncidentReport::new(
                    format!("High CPU usage alert on web-{}", i),
                    now - ChronoDuration::seconds(60 + i as i64),
                )
                .for_metric("cpu_usage"),
            )
            .unwrap();
    }
    store
        .append_metric(MetricSample::new("cpu_usage", 93.5, now - ChronoDuration::seconds(30)))
        .unwrap();
}

#[tokio::test]
async fn test_correlated_evidence_yields_one_recommendation() {
    let stub = CountingStub::new(Ok("Increase threshold to 85%".to_string()));
    let (orchestrator, store, board) = build(stub.clone());
    ingest_cpu_evidence(&store, 5);
    let key = MetricKey::new("cpu_usage");

    let outcome = orchestrator.evaluate(&key).await;

    assert_eq!(stub.calls(), 1);
    let prompts = stub.prompts.lock().unwrap().clone();
    assert!(prompts[0].contains("cpu_usage"));
    assert!(prompts[0].contains("Incidents in window: 5"));

    match outcome {
        EvaluationOutcome::Recommended { recommendation } => {
            assert_eq!(recommendation.text, "Increase threshold to 85%");
            assert_eq!(recommendation.metric_key, key);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    let published = board.get(&key).unwrap().latest.unwrap();
    assert_eq!(published.text, "Increase threshold to 85%");
    assert_eq!(orchestrator.gate_state(&key), GateState::Idle);
}

#[tokio::test]
async fn test_persistent_server_errors_reach_sink_and_release_gate() {
    let stub = CountingStub::new(Err(AdvisoryError::transport("HTTP 503: Service Unavailable")));
    let (orchestrator, store, board) = build(stub.clone());
    ingest_cpu_evidence(&store, 5);
    let key = MetricKey::new("cpu_usage");

    let outcome = orchestrator.evaluate(&key).await;
    assert!(matches!(outcome, EvaluationOutcome::Failed { ref kind, .. } if kind == "transport"));
    assert_eq!(stub.calls(), 3);
    assert_eq!(board.get(&key).unwrap().last_failure.unwrap().kind, "transport");
    assert_eq!(orchestrator.gate_state(&key), GateState::Idle);

    // The next evaluation starts from scratch
    let outcome = orchestrator.evaluate(&key).await;
    assert!(matches!(outcome, EvaluationOutcome::Failed { .. }));
    assert_eq!(stub.calls(), 6);
    assert_eq!(orchestrator.stats().failures, 2);
}

#[tokio::test]
async fn test_second_evaluate_while_in_flight_makes_no_call() {
    let stub = Arc::new(BlockingStub {
        calls: AtomicUsize::new(0),
        release: Notify::new(),
    });
    let (orchestrator, store, board) = build(stub.clone());
    ingest_cpu_evidence(&store, 5);
    let key = MetricKey::new("cpu_usage");

    let first = orchestrator.spawn_evaluate(key.clone());
    tokio::time::timeout(Duration::from_secs(2), async {
        while stub.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(orchestrator.gate_state(&key), GateState::RequestInFlight);

    let second = orchestrator.evaluate(&key).await;
    assert_eq!(
        second,
        EvaluationOutcome::Skipped {
            metric_key: key.clone(),
            state: GateState::RequestInFlight,
        }
    );
    assert_eq!(stub.calls.load(Ordering::SeqCst), 1);

    stub.release.notify_one();
    let first = first.await.unwrap();
    assert!(matches!(first, EvaluationOutcome::Recommended { .. }));
    assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.gate_state(&key), GateState::Idle);
    assert_eq!(board.len(), 1);
    assert_eq!(orchestrator.stats().skipped, 1);
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_request() {
    let stub = Arc::new(BlockingStub {
        calls: AtomicUsize::new(0),
        release: Notify::new(),
    });
    let (orchestrator, store, board) = build(stub.clone());
    ingest_cpu_evidence(&store, 5);
    let key = MetricKey::new("cpu_usage");

    let task = orchestrator.spawn_evaluate(key.clone());
    while stub.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    orchestrator.shutdown();

    let outcome = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, EvaluationOutcome::Failed { ref kind, .. } if kind == "cancelled"));
    assert_eq!(board.get(&key).unwrap().last_failure.unwrap().kind, "cancelled");
    assert_eq!(orchestrator.gate_state(&key), GateState::Idle);
}

#[tokio::test]
async fn test_untagged_incidents_count_for_every_key() {
    let stub = CountingStub::new(Ok("Raise both thresholds".to_string()));
    let (orchestrator, store, _board) = build(stub.clone());
    let now = Utc::now();
    for i in 0..3 {
        store
            .append_incident(IncidentReport::new(
                format!("PagerDuty page {}", i),
                now - ChronoDuration::seconds(20),
            ))
            .unwrap();
    }
    store
        .append_metric(MetricSample::new("cpu_usage", 70.0, now - ChronoDuration::seconds(10)))
        .unwrap();
    store
        .append_metric(MetricSample::new("mem_usage", 80.0, now - ChronoDuration::seconds(10)))
        .unwrap();

    let outcomes = orchestrator.evaluate_all().await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, EvaluationOutcome::Recommended { .. })));
    assert_eq!(stub.calls(), 2);
}
