//! # Advisor Correlation
//!
//! Pure decision logic between the evidence store and the advisory client:
//! - `CorrelationPolicy` decides whether a metric key has gathered enough
//!   incidents to justify asking for advice and summarizes the evidence
//! - `PromptBuilder` turns that summary into a bounded prompt
//!
//! Nothing in this crate performs I/O.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod policy;
pub mod prompt;

pub use policy::{CorrelationPolicy, Decision, Evidence};
pub use prompt::PromptBuilder;

/// Longest prefix of `s` that fits in `max` bytes without splitting a char
pub(crate) fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
