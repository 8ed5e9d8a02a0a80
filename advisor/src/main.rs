//! LLM Advisor Main Binary
//!
//! Wires the advisor together:
//! - Evidence store fed by the HTTP API and the configured feeds
//! - Orchestrator evaluating every metric key on a timer
//! - OpenAI-compatible advisory transport
//! - REST API for ingestion, on-demand evaluation and results

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{signal, sync::watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llm_advisor_api::{ApiConfig, AppState};
use llm_advisor_client::OpenAiTransport;
use llm_advisor_core::{
    config::Config,
    events::{IncidentReport, MetricSample},
    types::MetricKey,
};
use llm_advisor_correlation::{CorrelationPolicy, PromptBuilder};
use llm_advisor_ingestion::{adapters, IngestionPoller};
use llm_advisor_orchestrator::{
    EvaluationOutcome, FanoutSink, LogSink, Orchestrator, RecommendationBoard,
};
use llm_advisor_storage::{EvidenceStorage, EvidenceStore};

/// LLM Advisor CLI arguments
#[derive(Debug, Parser)]
#[clap(name = "advisor", version, about = "Alert-threshold advice from correlated metrics and incidents")]
struct Cli {
    /// Configuration file path
    #[clap(short, long, default_value = "config/advisor.yaml", global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long, env = "ADVISOR_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Enable JSON logging
    #[clap(long, env = "ADVISOR_LOG_JSON", global = true)]
    log_json: bool,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the advisor service (default if no subcommand given)
    Serve,
    /// Load recorded evidence and evaluate every metric key once
    Replay {
        /// JSON file holding an array of metric and incident events
        #[clap(long)]
        events_file: PathBuf,

        /// Evaluate against the window ending here (default: newest event)
        #[clap(long)]
        at: Option<DateTime<Utc>>,

        /// Print decisions and prompts without calling the advisory service
        #[clap(long)]
        dry_run: bool,
    },
    /// Validate the configuration and exit
    Check,
}

/// One recorded event in a replay file
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplayEvent {
    Metric {
        metric_key: String,
        value: f64,
        observed_at: DateTime<Utc>,
    },
    Incident {
        description: String,
        #[serde(default)]
        metric_key: Option<String>,
        observed_at: DateTime<Utc>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    info!("Starting LLM Advisor v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Some(Commands::Replay {
            events_file,
            at,
            dry_run,
        }) => run_replay_command(&cli.config, events_file, *at, *dry_run).await,
        Some(Commands::Check) => run_check_command(&cli.config),
        Some(Commands::Serve) | None => run_serve_command(&cli.config).await,
    }
}

fn load_config(path: &Path) -> Result<Config> {
    info!("Loading configuration from: {:?}", path);
    let config = Config::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if config.advisory.api_key.is_none() {
        warn!("No advisory API key configured (set OPENAI_API_KEY)");
    }
    Ok(config)
}

/// Run the service until SIGINT/SIGTERM
async fn run_serve_command(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    let store = Arc::new(EvidenceStore::new(config.store.clone()));
    let transport = Arc::new(
        OpenAiTransport::new(&config.advisory).context("Failed to create advisory transport")?,
    );
    let board = Arc::new(RecommendationBoard::new());
    let sink = FanoutSink::new()
        .with(Arc::new(LogSink))
        .with(board.clone());

    let orchestrator = Arc::new(
        Orchestrator::from_config(&config, store.clone(), transport, Arc::new(sink))
            .context("Failed to create orchestrator")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Feeds
    let feeds = adapters::from_config(&config.ingestion).context("Failed to create ingestion feeds")?;
    let mut poller = IngestionPoller::new(store.clone()).with_adapters(feeds);
    if config.orchestrator.evaluate_on_ingest {
        let orchestrator = Arc::clone(&orchestrator);
        poller = poller.with_hook(Arc::new(move |key: &MetricKey| {
            orchestrator.spawn_evaluate(key.clone());
        }));
    }
    info!(feeds = poller.adapter_count(), "Starting ingestion feeds");
    let feed_tasks = poller.spawn(shutdown_rx);

    // Timer-driven evaluation
    let evaluation_task = tokio::spawn(
        Arc::clone(&orchestrator).run(config.orchestrator.evaluation_interval()),
    );

    // API
    let api_config =
        ApiConfig::from_server_config(&config.server).context("Invalid server address")?;
    let state = AppState::new(Arc::clone(&orchestrator), board)
        .with_evaluate_on_ingest(config.orchestrator.evaluate_on_ingest);

    let served = llm_advisor_api::serve(api_config, state, shutdown_signal()).await;
    if let Err(e) = &served {
        error!(error = %e, "API server failed");
    }

    info!("Shutting down");
    orchestrator.shutdown();
    shutdown_tx.send_replace(true);
    for task in feed_tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Ingestion task ended abnormally");
        }
    }
    if let Err(e) = evaluation_task.await {
        warn!(error = %e, "Evaluation task ended abnormally");
    }

    let stats = orchestrator.stats();
    info!(
        evaluations = stats.evaluations,
        recommendations = stats.recommendations,
        failures = stats.failures,
        "LLM Advisor stopped"
    );
    served.context("API server failed")
}

/// Replay recorded evidence and evaluate each key once
async fn run_replay_command(
    config_path: &Path,
    events_file: &Path,
    at: Option<DateTime<Utc>>,
    dry_run: bool,
) -> Result<()> {
    let config = load_config(config_path)?;

    let content = std::fs::read_to_string(events_file).context("Failed to read events file")?;
    let events: Vec<ReplayEvent> =
        serde_json::from_str(&content).context("Failed to parse events JSON")?;

    let store = Arc::new(EvidenceStore::new(config.store.clone()));
    let (accepted, rejected) = load_events(store.as_ref(), events);
    info!(accepted, rejected, "Replay events loaded");

    let now = match at.or(store.stats().watermark) {
        Some(now) => now,
        None => {
            println!("No events to evaluate");
            return Ok(());
        }
    };

    if dry_run {
        let policy = CorrelationPolicy::new(config.correlation.clone())?;
        let prompts = PromptBuilder::from_config(&config.prompt)?;
        for key in store.metric_keys() {
            let snapshot = store.snapshot_window(&key, policy.window_start(now));
            let decision = policy.decide(&key, &snapshot.metrics, &snapshot.incidents, now);
            println!("{}", "=".repeat(70));
            println!(
                "{}: {} samples, {} incidents, triggered: {}",
                key,
                decision.evidence.sample_count,
                decision.evidence.incident_count,
                decision.triggered
            );
            if decision.triggered {
                println!("{}", "-".repeat(70));
                println!("{}", prompts.build(&decision.evidence));
            }
        }
        println!("{}", "=".repeat(70));
        return Ok(());
    }

    let transport = Arc::new(
        OpenAiTransport::new(&config.advisory).context("Failed to create advisory transport")?,
    );
    let orchestrator = Arc::new(
        Orchestrator::from_config(&config, store, transport, Arc::new(LogSink))
            .context("Failed to create orchestrator")?,
    );

    for outcome in orchestrator.evaluate_all_at(now).await {
        match &outcome {
            EvaluationOutcome::Recommended { recommendation } => {
                println!("{}: {}", recommendation.metric_key, recommendation.text)
            }
            EvaluationOutcome::Failed {
                metric_key, error, ..
            } => println!("{}: advisory request failed: {}", metric_key, error),
            EvaluationOutcome::NotTriggered {
                metric_key,
                incident_count,
                ..
            } => println!(
                "{}: not enough correlated incidents ({})",
                metric_key, incident_count
            ),
            EvaluationOutcome::Skipped { metric_key, .. } => {
                println!("{}: skipped", metric_key)
            }
        }
    }
    Ok(())
}

/// Append replay events in file order; returns (accepted, rejected)
fn load_events(store: &dyn EvidenceStorage, events: Vec<ReplayEvent>) -> (usize, usize) {
    let mut accepted = 0;
    let mut rejected = 0;
    for event in events {
        let result = match event {
            ReplayEvent::Metric {
                metric_key,
                value,
                observed_at,
            } => store.append_metric(MetricSample::new(metric_key, value, observed_at)),
            ReplayEvent::Incident {
                description,
                metric_key,
                observed_at,
            } => {
                let report = IncidentReport::new(description, observed_at);
                let report = match metric_key {
                    Some(key) => report.for_metric(key),
                    None => report,
                };
                store.append_incident(report).map(|_| ())
            }
        };
        match result {
            Ok(()) => accepted += 1,
            Err(e) => {
                rejected += 1;
                warn!(error = %e, "Skipping replay event");
            }
        }
    }
    (accepted, rejected)
}

/// Validate configuration and print a summary
fn run_check_command(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    println!("Configuration OK: {}", config_path.display());
    println!("  Server:       {}:{}", config.server.host, config.server.port);
    println!(
        "  Advisory:     {} (model {}, {} attempts, {}ms timeout)",
        config.advisory.endpoint,
        config.advisory.model,
        config.advisory.max_attempts,
        config.advisory.request_timeout_ms
    );
    println!(
        "  API key:      {}",
        if config.advisory.api_key.is_some() { "set" } else { "missing" }
    );
    println!(
        "  Correlation:  {} incidents within {}s",
        config.correlation.incident_threshold, config.correlation.lookback_secs
    );
    println!(
        "  Evaluation:   every {}s, {}s deadline, {} concurrent requests",
        config.orchestrator.evaluation_interval_secs,
        config.orchestrator.evaluation_deadline_secs,
        config.orchestrator.max_concurrent_requests
    );
    println!(
        "  Feeds:        prometheus={} pagerduty={} synthetic={}",
        config.ingestion.prometheus.is_some(),
        config.ingestion.pagerduty.is_some(),
        config.ingestion.synthetic.is_some()
    );
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("Received Ctrl+C, shutting down..."); },
        _ = terminate => { info!("Received SIGTERM, shutting down..."); },
    }
}

/// Initialize logging based on CLI arguments
fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .context("Invalid log level")?;

    if cli.log_json {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .with(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(log_level.into()),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .with(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(log_level.into()),
            )
            .init();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_parses_replay() {
        let cli = Cli::parse_from([
            "advisor",
            "--config",
            "custom.yaml",
            "replay",
            "--events-file",
            "events.json",
            "--dry-run",
        ]);
        assert_eq!(cli.config, PathBuf::from("custom.yaml"));
        match cli.command {
            Some(Commands::Replay {
                events_file,
                dry_run,
                at,
            }) => {
                assert_eq!(events_file, PathBuf::from("events.json"));
                assert!(dry_run);
                assert!(at.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_defaults_to_serve() {
        let cli = Cli::parse_from(["advisor"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("config/advisor.yaml"));
    }

    #[test]
    fn test_load_events() {
        let json = r#"[
            {"type": "metric", "metric_key": "cpu_usage", "value": 91.5, "observed_at": "2024-05-01T12:00:00Z"},
            {"type": "incident", "description": "CPU spike", "metric_key": "cpu_usage", "observed_at": "2024-05-01T11:59:00Z"},
            {"type": "incident", "description": "Global page", "observed_at": "2024-05-01T11:58:00Z"},
            {"type": "metric", "metric_key": "cpu_usage", "value": 1.0, "observed_at": "1970-01-01T00:00:00Z"}
        ]"#;
        let events: Vec<ReplayEvent> = serde_json::from_str(json).unwrap();
        let store = EvidenceStore::with_defaults();

        let (accepted, rejected) = load_events(&store, events);
        assert_eq!((accepted, rejected), (3, 1));
        assert_eq!(store.stats().incidents, 2);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "correlation:\n  incident_threshold: 4\nprompt:\n  max_len: 2048").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.correlation.incident_threshold, 4);
        assert_eq!(config.prompt.max_len, 2048);
    }
}
