//! Session identity and conversational history.
//!
//! A session is identified by a caller-supplied key. The key is never derived
//! from query text: two users asking the same opening question must not share
//! artifacts, escalation counters or build locks.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors constructing a [`SessionKey`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionKeyError {
    #[error("session key must not be empty")]
    Empty,
    #[error("session key exceeds {max} characters")]
    TooLong { max: usize },
}

/// Explicit per-conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey(String);

impl SessionKey {
    pub const MAX_LEN: usize = 128;

    /// Validate and wrap a caller-supplied identifier.
    pub fn new(raw: impl Into<String>) -> Result<Self, SessionKeyError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SessionKeyError::Empty);
        }
        if trimmed.chars().count() > Self::MAX_LEN {
            return Err(SessionKeyError::TooLong { max: Self::MAX_LEN });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionKey {
    type Error = SessionKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.0
    }
}

/// One completed exchange in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub query: String,
    pub response: String,
    pub at: DateTime<Utc>,
}

/// Bounded buffer of recent turns, oldest evicted first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: VecDeque<Turn>,
    capacity: usize,
}

impl ConversationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, query: impl Into<String>, response: impl Into<String>) {
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(Turn {
            query: query.into(),
            response: response.into(),
            at: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// Render as a prompt block, one `user:`/`assistant:` pair per turn.
    pub fn render(&self) -> String {
        if self.turns.is_empty() {
            return "(none)".to_string();
        }
        self.turns
            .iter()
            .map(|t| format!("user: {}\nassistant: {}", t.query, t.response))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_trims_and_rejects_empty() {
        assert_eq!(SessionKey::new("  abc ").unwrap().as_str(), "abc");
        assert_eq!(SessionKey::new("   "), Err(SessionKeyError::Empty));
    }

    #[test]
    fn session_key_rejects_overlong() {
        let long = "k".repeat(SessionKey::MAX_LEN + 1);
        assert!(matches!(
            SessionKey::new(long),
            Err(SessionKeyError::TooLong { .. })
        ));
    }

    #[test]
    fn session_key_deserialize_validates() {
        let ok: SessionKey = serde_json::from_str("\"s-1\"").unwrap();
        assert_eq!(ok.as_str(), "s-1");
        assert!(serde_json::from_str::<SessionKey>("\"\"").is_err());
    }

    #[test]
    fn history_evicts_oldest() {
        let mut h = ConversationHistory::new(2);
        h.push("q1", "a1");
        h.push("q2", "a2");
        h.push("q3", "a3");
        assert_eq!(h.len(), 2);
        let queries: Vec<_> = h.turns().map(|t| t.query.as_str()).collect();
        assert_eq!(queries, vec!["q2", "q3"]);
    }

    #[test]
    fn empty_history_renders_placeholder() {
        assert_eq!(ConversationHistory::new(4).render(), "(none)");
    }
}
