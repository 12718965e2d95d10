//! Advanced-answer request detection.
//!
//! A user who explicitly asks for the detailed answer bypasses the affirm
//! counter. Detection is a plain case-insensitive substring match against a
//! configurable phrase list.

use serde::{Deserialize, Serialize};

/// Phrases that force escalation when they appear anywhere in the query.
pub const DEFAULT_ADVANCED_PHRASES: &[&str] = &[
    "고급 답변",
    "상세한 설명",
    "자세히 알려줘",
    "gpt-4",
    "판례까지",
    "전략도",
    "고급 ai",
    "detailed answer",
    "advanced answer",
    "in depth",
    "include precedents",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvancedRequestDetector {
    phrases: Vec<String>,
}

impl Default for AdvancedRequestDetector {
    fn default() -> Self {
        Self::new(DEFAULT_ADVANCED_PHRASES.iter().copied())
    }
}

impl AdvancedRequestDetector {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { phrases }
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// The first configured phrase contained in `query`, if any.
    pub fn matched_phrase(&self, query: &str) -> Option<&str> {
        let lowered = query.to_lowercase();
        self.phrases
            .iter()
            .find(|p| lowered.contains(p.as_str()))
            .map(String::as_str)
    }

    pub fn wants_advanced(&self, query: &str) -> bool {
        self.matched_phrase(query).is_some()
    }
}
