//! # Advisor Core
//!
//! Shared building blocks for the LLM threshold advisor:
//! - Domain types (`MetricKey`, `IncidentId`)
//! - Evidence events (`MetricSample`, `IncidentRecord`, `Recommendation`)
//! - Configuration loading and validation
//! - The crate-wide `Error` / `Result`

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::events::{IncidentRecord, IncidentReport, MetricSample, Recommendation};
    pub use crate::types::{IncidentId, MetricKey};
    pub use crate::{Error, Result};
}
