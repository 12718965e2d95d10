//! Escalation Engine: deterministic transition over (state, verdict).
//!
//! No LLM calls happen here. The engine consumes the sentinel and intent
//! already extracted from a [`Verdict`] and decides whether this turn
//! surfaces the deep answer.

use serde::{Deserialize, Serialize};

use super::sentinel::Sentinel;
use super::state::EscalationState;
use super::verdict::Verdict;

/// Why a turn did or did not escalate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// Affirm counter reached the threshold
    ThresholdReached { count: u32, threshold: u32 },
    /// User explicitly asked for the advanced answer
    ForcedAdvanced,
    /// Negative marker suppressed escalation
    Suppressed,
    /// Below threshold, no explicit request
    BelowThreshold { count: u32, threshold: u32 },
}

/// Decision produced for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub escalate: bool,
    pub reason: EscalationReason,
    /// State after the transition
    pub state: EscalationState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Affirm verdicts needed before the deep answer is surfaced
    pub affirm_threshold: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            affirm_threshold: 3,
        }
    }
}

/// The Escalation Engine
#[derive(Debug, Clone, Default)]
pub struct EscalationEngine {
    config: EscalationConfig,
}

impl EscalationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EscalationConfig) -> Self {
        Self { config }
    }

    pub fn threshold(&self) -> u32 {
        self.config.affirm_threshold
    }

    /// Apply one verdict to `state` and decide whether to escalate.
    ///
    /// Negative never decrements the counter and never escalates. A forced
    /// request bypasses the counter but not a negative marker.
    pub fn decide(&self, state: &mut EscalationState, verdict: &Verdict) -> EscalationDecision {
        self.transition(state, verdict.sentinel, verdict.force_advanced)
    }

    /// Same as [`decide`](Self::decide) but over the raw signals.
    pub fn transition(
        &self,
        state: &mut EscalationState,
        sentinel: Sentinel,
        force_advanced: bool,
    ) -> EscalationDecision {
        let negative = sentinel == Sentinel::Negative;
        let delta = u32::from(sentinel == Sentinel::Affirm);
        let threshold = self.config.affirm_threshold;

        state.negative_flag = negative;
        state.yes_count = state.yes_count.saturating_add(delta);
        let count = state.yes_count;

        let (escalate, reason) = if negative {
            (false, EscalationReason::Suppressed)
        } else if count >= threshold {
            (
                true,
                EscalationReason::ThresholdReached { count, threshold },
            )
        } else if force_advanced {
            (true, EscalationReason::ForcedAdvanced)
        } else {
            (false, EscalationReason::BelowThreshold { count, threshold })
        };

        if escalate {
            state.escalated_once = true;
        }

        EscalationDecision {
            escalate,
            reason,
            state: *state,
        }
    }
}
