//! Scenario engine: named state machines gating mapping eligibility.
//!
//! Every scenario starts in [`STARTED_STATE`]. Transitions are
//! compare-and-swap: the required-state check and the new-state write happen
//! atomically under the table lock, so contending requests either win the
//! transition or observe the newer state and re-evaluate.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// The state every scenario begins in.
pub const STARTED_STATE: &str = "Started";

#[derive(Default)]
pub struct ScenarioEngine {
    states: Mutex<HashMap<String, String>>,
}

impl ScenarioEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a scenario; unknown scenarios are in `Started`.
    pub fn state_of(&self, name: &str) -> String {
        self.states
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_else(|| STARTED_STATE.to_string())
    }

    /// Atomically move `name` from `from` to `to`. A `from` of `None`
    /// transitions regardless of the current state. Returns whether the
    /// swap happened.
    pub fn transition(&self, name: &str, from: Option<&str>, to: &str) -> bool {
        let mut states = self.states.lock();
        let current = states
            .get(name)
            .map(String::as_str)
            .unwrap_or(STARTED_STATE);
        if let Some(required) = from {
            if current != required {
                debug!(
                    scenario = name,
                    required, current, "scenario transition lost"
                );
                return false;
            }
        }
        debug!(scenario = name, from = current, to, "scenario transition");
        states.insert(name.to_string(), to.to_string());
        true
    }

    /// Unconditional admin override.
    pub fn set_state(&self, name: &str, state: &str) {
        self.states
            .lock()
            .insert(name.to_string(), state.to_string());
    }

    /// Reset every scenario back to `Started`.
    pub fn reset(&self) {
        self.states.lock().clear();
    }

    /// Names and states of every scenario that has been touched.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.states.lock().clone()
    }
}
