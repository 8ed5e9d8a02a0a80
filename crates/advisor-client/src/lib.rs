//! # Advisor Client
//!
//! Everything between a finished prompt and the advice text:
//! - `AdvisoryTransport`: one request to the advisory service
//! - `OpenAiTransport`: OpenAI-compatible HTTP transport
//! - `AdvisoryClient`: per-attempt timeout, retry with exponential backoff
//!   and jitter, typed failures
//! - `AskContext`: caller deadline and cancellation

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod client;
pub mod context;
pub mod error;
pub mod transport;

pub use client::{AdvisoryClient, RetryPolicy};
pub use context::{AskContext, CancelHandle};
pub use error::AdvisoryError;
pub use transport::{AdvisoryTransport, OpenAiTransport};
