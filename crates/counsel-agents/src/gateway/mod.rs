//! External collaborator interfaces.
//!
//! The pipeline only sees these traits. Reference adapters:
//!
//! | Trait               | Adapter                    | Backend                         |
//! |---------------------|----------------------------|---------------------------------|
//! | `CompletionGateway` | `OpenAiCompletionGateway`  | OpenAI-compatible chat + SSE    |
//! | `FactSearch`        | `TavilyFactSearch`         | Tavily search, domain allow-list |
//! | `RecordStore`       | `PgRecordStore`            | Postgres `ILIKE`                |
//! | `RetrievalGateway`  | `PgRecordStore`            | `pg_trgm` + lexical keywords    |

pub mod lexical;
pub mod openai;
pub mod policy;
pub mod postgres;
pub mod tavily;

use async_trait::async_trait;
use counsel_coordination::{Candidate, PrecedentRecord};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

pub use lexical::LexicalKeywordExtractor;
pub use openai::OpenAiCompletionGateway;
pub use policy::{CallKind, CallPolicy};
pub use postgres::PgRecordStore;
pub use tavily::TavilyFactSearch;

/// Why a completion is requested. Selects model and temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPurpose {
    Triage,
    Relevance,
    Choose,
    Template,
    Strategy,
    EvaluateStrategy,
    ReviseStrategy,
    Generate,
    AnswerCritique,
}

impl CallPurpose {
    pub fn kind(self) -> CallKind {
        match self {
            Self::Triage => CallKind::Triage,
            Self::Generate => CallKind::Generation,
            _ => CallKind::Stage,
        }
    }
}

impl std::fmt::Display for CallPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Triage => "triage",
            Self::Relevance => "relevance",
            Self::Choose => "choose",
            Self::Template => "template",
            Self::Strategy => "strategy",
            Self::EvaluateStrategy => "evaluate_strategy",
            Self::ReviseStrategy => "revise_strategy",
            Self::Generate => "generate",
            Self::AnswerCritique => "answer_critique",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub purpose: CallPurpose,
    pub system: String,
    pub prompt: String,
}

impl CompletionRequest {
    pub fn new(purpose: CallPurpose, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            purpose,
            system: system.into(),
            prompt: prompt.into(),
        }
    }
}

/// Incremental completion output. Dropping the stream abandons the request.
pub type TextStream = BoxStream<'static, Result<String, GatewayError>>;

#[async_trait]
pub trait CompletionGateway: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, GatewayError>;

    async fn stream(&self, request: CompletionRequest) -> Result<TextStream, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub content: String,
    pub score: f64,
}

#[async_trait]
pub trait RetrievalGateway: Send + Sync {
    /// Up to `top_k` keywords, most salient first.
    async fn extract_keywords(&self, text: &str, top_k: usize) -> Result<Vec<String>, GatewayError>;

    async fn similarity_search(&self, text: &str, k: usize)
        -> Result<Vec<ScoredDocument>, GatewayError>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Prior consultations matching any keyword, in store order.
    async fn find_candidates(&self, keywords: &[String]) -> Result<Vec<Candidate>, GatewayError>;

    async fn find_precedent(
        &self,
        categories: &[String],
        titles: &[String],
        keywords: &[String],
    ) -> Result<Vec<PrecedentRecord>, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub content: String,
}

#[async_trait]
pub trait FactSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, GatewayError>;
}

/// First `limit` non-empty hit contents, trimmed.
pub fn snippets(hits: &[SearchHit], limit: usize) -> Vec<String> {
    hits.iter()
        .map(|h| h.content.trim())
        .filter(|c| !c.is_empty())
        .take(limit)
        .map(str::to_string)
        .collect()
}
