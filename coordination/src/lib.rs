//! Counsel Coordination Library
//!
//! The deterministic, LLM-free core of the counsel pipeline:
//!
//! - [`escalation`]: sentinel parsing, advanced-request detection and the
//!   per-session escalation state machine
//! - [`cache`]: session-scoped artifact cache with fixed TTL
//! - [`build_lock`]: per-session single-flight lock for the generation stage
//! - [`artifacts`]: deep-build artifact types and their text helpers
//! - [`session`]: session keys and bounded conversation history
//!
//! Everything that talks to a model, a search API or a database lives in the
//! `counsel-agents` crate.

#![allow(clippy::uninlined_format_args)]

pub mod artifacts;
pub mod build_lock;
pub mod cache;
pub mod escalation;
pub mod session;

pub use artifacts::{
    finish_summary, insert_hyperlinks, Candidate, Critique, Hyperlink, Precedent,
    PrecedentRecord, PrecedentStatus, Strategy, Template,
};
pub use build_lock::{Acquire, BuildLocks, BuildPermit, BusyPolicy, SharedBuildLocks};
pub use cache::{ArtifactPatch, CacheEntry, SessionArtifactCache, SharedArtifactCache, Stage};
pub use escalation::{
    AdvancedRequestDetector, EscalationConfig, EscalationDecision, EscalationEngine,
    EscalationState, QueryClass, Sentinel, SentinelError, SentinelMarkers, Verdict,
};
pub use session::{ConversationHistory, SessionKey, SessionKeyError, Turn};
