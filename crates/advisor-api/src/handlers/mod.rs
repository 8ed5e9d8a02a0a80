//! API request handlers.

pub mod health;
pub mod ingest;
pub mod recommendations;

pub use health::*;
pub use ingest::*;
pub use recommendations::*;

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

use llm_advisor_orchestrator::{Orchestrator, RecommendationBoard};
use llm_advisor_storage::EvidenceStorage;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EvidenceStorage>,
    pub orchestrator: Arc<Orchestrator>,
    pub board: Arc<RecommendationBoard>,
    /// Start an evaluation for a key whenever evidence for it arrives
    pub evaluate_on_ingest: bool,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, board: Arc<RecommendationBoard>) -> Self {
        Self {
            store: Arc::clone(orchestrator.store()),
            orchestrator,
            board,
            evaluate_on_ingest: false,
            started_at: Utc::now(),
        }
    }

    pub fn with_evaluate_on_ingest(mut self, enabled: bool) -> Self {
        self.evaluate_on_ingest = enabled;
        self
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("orchestrator", &self.orchestrator)
            .field("evaluate_on_ingest", &self.evaluate_on_ingest)
            .field("started_at", &self.started_at)
            .finish()
    }
}
