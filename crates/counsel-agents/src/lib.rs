//! Counsel agents: the model-facing half of the escalation pipeline.
//!
//! | Module        | Purpose                                                  |
//! |---------------|----------------------------------------------------------|
//! | `gateway`     | Collaborator traits, call policy and reference adapters  |
//! | `triage`      | Cheap streamed answer, scope scoring, sentinel verdict   |
//! | `pipeline`    | Five-stage deep build over the session artifact cache    |
//! | `critique`    | Bounded strategy revision and flag-only answer review    |
//! | `coordinator` | Per-turn orchestration of triage and deep build          |
//! | `config`      | TOML/env configuration                                   |
//! | `prompts`     | Per-stage prompt templates and the placeholder renderer  |
//! | `messages`    | User-facing text for terminal statuses                   |

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod coordinator;
pub mod critique;
pub mod errors;
pub mod gateway;
pub mod messages;
pub mod parse;
pub mod pipeline;
pub mod prompts;
pub mod triage;

pub use config::CounselConfig;
pub use coordinator::{Coordinator, PurgeReport, TurnResult, TurnStatus};
pub use errors::{BuildError, GatewayError, RetryCategory, TriageError, TurnError};
pub use pipeline::{BuildStatus, DeepBuildPipeline, GeneratedAnswer};
pub use triage::{RetrievalContext, TriageClassifier};
