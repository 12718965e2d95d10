//! Escalation: deciding, turn by turn, whether the cheap triage answer is
//! enough or the deep answer must be surfaced.
//!
//! ```text
//! model text ──► SentinelMarkers::parse ──► Verdict ──► EscalationEngine::decide
//!                                             ▲                 │
//! query ──► AdvancedRequestDetector ──────────┘                 ▼
//!                                                     EscalationDecision
//!                                                  (escalate? + new state)
//! ```
//!
//! Everything here is pure and deterministic.

pub mod engine;
pub mod intent;
pub mod sentinel;
pub mod state;
pub mod verdict;

pub use engine::{EscalationConfig, EscalationDecision, EscalationEngine, EscalationReason};
pub use intent::{AdvancedRequestDetector, DEFAULT_ADVANCED_PHRASES};
pub use sentinel::{
    ParsedSentinel, Sentinel, SentinelError, SentinelMarkers, DEFAULT_AFFIRM_MARKER,
    DEFAULT_NEGATIVE_MARKER,
};
pub use state::EscalationState;
pub use verdict::{QueryClass, Verdict};
