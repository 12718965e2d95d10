//! Cache entry and the partial update merged into it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{Duration, Instant};

use crate::artifacts::{Candidate, Precedent, Strategy, Template};
use crate::session::SessionKey;

/// Deep-pipeline stages that leave an artifact behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Qualify,
    Template,
    Strategy,
    Precedent,
    Generate,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Qualify => write!(f, "qualify"),
            Self::Template => write!(f, "template"),
            Self::Strategy => write!(f, "strategy"),
            Self::Precedent => write!(f, "precedent"),
            Self::Generate => write!(f, "generate"),
        }
    }
}

/// Fields to fill in. `None` means "leave as is".
#[derive(Debug, Clone, Default)]
pub struct ArtifactPatch {
    /// Question the artifacts were built for.
    pub query: Option<String>,
    pub candidate: Option<Candidate>,
    pub template: Option<Template>,
    pub strategy: Option<Strategy>,
    pub precedent: Option<Precedent>,
    pub escalated_once: bool,
}

impl ArtifactPatch {
    pub fn candidate(candidate: Candidate) -> Self {
        Self {
            candidate: Some(candidate),
            ..Default::default()
        }
    }

    pub fn template(template: Template) -> Self {
        Self {
            template: Some(template),
            ..Default::default()
        }
    }

    pub fn strategy(strategy: Strategy) -> Self {
        Self {
            strategy: Some(strategy),
            ..Default::default()
        }
    }

    pub fn precedent(precedent: Precedent) -> Self {
        Self {
            precedent: Some(precedent),
            ..Default::default()
        }
    }

    pub fn escalated() -> Self {
        Self {
            escalated_once: true,
            ..Default::default()
        }
    }

    pub fn for_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub session_key: SessionKey,
    /// Set by the first artifact write; artifacts for any other question are
    /// refused until the entry is cleared or expires.
    pub query: Option<String>,
    pub candidate: Option<Candidate>,
    pub template: Option<Template>,
    pub strategy: Option<Strategy>,
    pub precedent: Option<Precedent>,
    pub escalated_once: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) expires_at: Instant,
}

impl CacheEntry {
    pub(crate) fn new(session_key: SessionKey, ttl: Duration) -> Self {
        Self {
            session_key,
            query: None,
            candidate: None,
            template: None,
            strategy: None,
            precedent: None,
            escalated_once: false,
            created_at: Utc::now(),
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Time left before the entry reads as absent.
    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Fill still-empty fields from `patch`. Returns the stages newly stored.
    pub(crate) fn merge(&mut self, patch: ArtifactPatch) -> Vec<Stage> {
        self.escalated_once |= patch.escalated_once;
        let mut stored = Vec::new();
        if let Some(theirs) = patch.query {
            if self.query.as_ref().is_some_and(|mine| *mine != theirs) {
                return stored;
            }
            self.query.get_or_insert(theirs);
        }
        if self.candidate.is_none() && patch.candidate.is_some() {
            self.candidate = patch.candidate;
            stored.push(Stage::Qualify);
        }
        if self.template.is_none() && patch.template.is_some() {
            self.template = patch.template;
            stored.push(Stage::Template);
        }
        if self.strategy.is_none() && patch.strategy.is_some() {
            self.strategy = patch.strategy;
            stored.push(Stage::Strategy);
        }
        if self.precedent.is_none() && patch.precedent.is_some() {
            self.precedent = patch.precedent;
            stored.push(Stage::Precedent);
        }
        stored
    }

    /// Template, strategy and precedent are all present.
    pub fn is_prepared(&self) -> bool {
        self.template.is_some() && self.strategy.is_some() && self.precedent.is_some()
    }

    /// The artifacts were built for `query`.
    pub fn built_for(&self, query: &str) -> bool {
        self.query.as_deref() == Some(query)
    }

    /// Ready for generation of `query`.
    pub fn is_prepared_for(&self, query: &str) -> bool {
        self.is_prepared() && self.built_for(query)
    }

    pub fn has(&self, stage: Stage) -> bool {
        match stage {
            Stage::Qualify => self.candidate.is_some(),
            Stage::Template => self.template.is_some(),
            Stage::Strategy => self.strategy.is_some(),
            Stage::Precedent => self.precedent.is_some(),
            Stage::Generate => false,
        }
    }
}
