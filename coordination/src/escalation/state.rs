//! Escalation State: per-session affirm counter and flags.

use serde::{Deserialize, Serialize};

/// Cross-turn escalation signal for one session.
///
/// Only [`EscalationEngine`](super::engine::EscalationEngine) mutates this.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationState {
    /// Affirm verdicts seen since the last reset
    pub yes_count: u32,
    /// Escalation was signalled at least once since the last reset
    pub escalated_once: bool,
    /// The most recent verdict carried the negative marker
    pub negative_flag: bool,
}

impl EscalationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to the initial `{0, false, false}` state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_initial(&self) -> bool {
        *self == Self::default()
    }
}

impl std::fmt::Display for EscalationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "yes_count={} escalated_once={} negative={}",
            self.yes_count, self.escalated_once, self.negative_flag
        )
    }
}
