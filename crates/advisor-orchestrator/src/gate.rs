//! Per-key evaluation gate.
//!
//! A key with no entry is `Idle`. Acquiring the gate inserts `Evaluating`;
//! dropping the returned guard removes the entry again, so every exit path
//! (including panics and cancelled futures) returns the key to `Idle`.

use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::fmt;

use llm_advisor_core::types::MetricKey;

/// Evaluation state of one metric key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Idle,
    Evaluating,
    RequestInFlight,
    Failed,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Evaluating => "evaluating",
            Self::RequestInFlight => "request_in_flight",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Gate states for all keys
#[derive(Debug, Default)]
pub struct KeyGates {
    states: DashMap<MetricKey, GateState>,
}

impl KeyGates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: &MetricKey) -> GateState {
        self.states
            .get(key)
            .map(|s| *s.value())
            .unwrap_or(GateState::Idle)
    }

    /// Move `key` from `Idle` to `Evaluating`.
    ///
    /// Returns `Err` with the current state when the key is busy.
    pub fn try_acquire(&self, key: &MetricKey) -> Result<GateGuard<'_>, GateState> {
        match self.states.entry(key.clone()) {
            Entry::Occupied(entry) => Err(*entry.get()),
            Entry::Vacant(entry) => {
                entry.insert(GateState::Evaluating);
                Ok(GateGuard {
                    gates: self,
                    key: key.clone(),
                })
            }
        }
    }

    /// Number of keys not currently `Idle`
    pub fn busy(&self) -> usize {
        self.states.len()
    }
}

/// Exclusive hold on one key's gate
pub struct GateGuard<'a> {
    gates: &'a KeyGates,
    key: MetricKey,
}

impl GateGuard<'_> {
    pub fn key(&self) -> &MetricKey {
        &self.key
    }

    /// Record progress; `Idle` is only reached by dropping the guard
    pub fn set(&self, state: GateState) {
        if state == GateState::Idle {
            return;
        }
        if let Some(mut current) = self.gates.states.get_mut(&self.key) {
            *current = state;
        }
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gates.states.remove(&self.key);
    }
}

impl fmt::Debug for GateGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateGuard")
            .field("key", &self.key)
            .field("state", &self.gates.state(&self.key))
            .finish()
    }
}
