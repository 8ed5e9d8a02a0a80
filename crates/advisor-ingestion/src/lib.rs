//! # Advisor Ingestion
//!
//! Feeds that bring evidence into the store:
//! - Prometheus instant queries (metric samples)
//! - PagerDuty incidents
//! - A synthetic `cpu_usage` feed for demos and local runs
//!
//! `IngestionPoller` polls each feed on its own interval and appends what it
//! gets to an `EvidenceStorage`. Nothing in the evaluation path depends on
//! how evidence arrives.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod adapters;
pub mod poller;

pub use adapters::{
    FeedAdapter, FeedBatch, PagerDutyAdapter, PrometheusAdapter, SyntheticFeed,
};
pub use poller::{IngestHook, IngestSummary, IngestionPoller};
