//! Triage verdict types.

use serde::{Deserialize, Serialize};

use super::sentinel::Sentinel;

/// Whether a query falls inside the domain the deep pipeline can answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    InScope,
    OutOfScope,
}

impl std::fmt::Display for QueryClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InScope => write!(f, "in_scope"),
            Self::OutOfScope => write!(f, "out_of_scope"),
        }
    }
}

/// Structured output of one triage classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Full model output, marker included.
    pub raw_text: String,
    /// Model output with the trailing marker removed.
    pub cheap_response: String,
    pub sentinel: Sentinel,
    pub query_class: QueryClass,
    /// The user explicitly asked for the advanced answer.
    pub force_advanced: bool,
    /// Share of query keywords also present in the retrieval context (0.0-1.0).
    pub relevance: f64,
}

impl Verdict {
    pub fn is_negative(&self) -> bool {
        self.sentinel == Sentinel::Negative
    }

    pub fn is_in_scope(&self) -> bool {
        self.query_class == QueryClass::InScope
    }
}
