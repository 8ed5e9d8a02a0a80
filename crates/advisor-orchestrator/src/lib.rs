//! # Advisor Orchestrator
//!
//! Drives one evaluation per metric key: snapshot the evidence, run the
//! correlation policy, and when it triggers build a prompt, ask the advisory
//! service and publish the result to a [`ResultSink`].
//!
//! At most one evaluation per key runs at a time; see [`gate`].

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod gate;
pub mod orchestrator;
pub mod sink;

pub use gate::{GateGuard, GateState, KeyGates};
pub use orchestrator::{EvaluationOutcome, Orchestrator, OrchestratorStats};
pub use sink::{BoardEntry, FailureRecord, FanoutSink, LogSink, RecommendationBoard, ResultSink};
