//! Triage Classifier: the cheap, always-run answer.
//!
//! One streamed completion per turn. The stream is read incrementally and
//! abandoned as soon as its tail ends with the negative marker; whatever was
//! received is then parsed by the shared sentinel parser.

use std::collections::HashSet;
use std::sync::Arc;

use counsel_coordination::escalation::{
    AdvancedRequestDetector, QueryClass, SentinelMarkers, Verdict,
};
use counsel_coordination::ConversationHistory;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::CounselConfig;
use crate::errors::{GatewayError, TriageError};
use crate::gateway::{
    CallKind, CallPolicy, CallPurpose, CompletionGateway, CompletionRequest, RetrievalGateway,
    ScoredDocument,
};
use crate::prompts::StagePrompt;

/// Keywords and documents related to the query, computed once per turn.
#[derive(Debug, Clone, Default)]
pub struct RetrievalContext {
    pub query_keywords: Vec<String>,
    pub documents: Vec<ScoredDocument>,
    pub context_keywords: Vec<String>,
}

impl RetrievalContext {
    /// No related documents were found.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Share of query keywords that also occur in the context keywords.
    pub fn relevance(&self) -> f64 {
        if self.query_keywords.is_empty() {
            return 0.0;
        }
        let context: HashSet<&str> = self.context_keywords.iter().map(String::as_str).collect();
        let hits = self
            .query_keywords
            .iter()
            .filter(|k| context.contains(k.as_str()))
            .count();
        hits as f64 / self.query_keywords.len() as f64
    }

    /// Scope and relevance score for this context.
    ///
    /// An empty context degrades to in scope with zero relevance. A query
    /// without keywords against a non-empty context is out of scope.
    pub fn classify(&self, in_scope_threshold: f64) -> (QueryClass, f64) {
        if self.is_empty() {
            return (QueryClass::InScope, 0.0);
        }
        if self.query_keywords.is_empty() {
            return (QueryClass::OutOfScope, 0.0);
        }
        let relevance = self.relevance();
        let class = if relevance < in_scope_threshold {
            QueryClass::OutOfScope
        } else {
            QueryClass::InScope
        };
        (class, relevance)
    }
}

pub struct TriageClassifier {
    completion: Arc<dyn CompletionGateway>,
    retrieval: Arc<dyn RetrievalGateway>,
    policy: CallPolicy,
    prompt: StagePrompt,
    markers: SentinelMarkers,
    detector: AdvancedRequestDetector,
    negative_window: usize,
    in_scope_threshold: f64,
    keyword_top_k: usize,
    similarity_k: usize,
}

impl TriageClassifier {
    pub fn new(
        completion: Arc<dyn CompletionGateway>,
        retrieval: Arc<dyn RetrievalGateway>,
        config: &CounselConfig,
    ) -> Self {
        Self {
            completion,
            retrieval,
            policy: CallPolicy::new(config.timeouts.clone(), config.retry.clone()),
            prompt: config.prompts.triage.clone(),
            markers: config.escalation.markers.clone(),
            detector: AdvancedRequestDetector::new(&config.escalation.advanced_phrases),
            negative_window: config.escalation.negative_window,
            in_scope_threshold: config.escalation.in_scope_threshold,
            keyword_top_k: config.record_store.keyword_top_k,
            similarity_k: config.record_store.similarity_k,
        }
    }

    pub fn markers(&self) -> &SentinelMarkers {
        &self.markers
    }

    /// Query keywords, related documents and their keywords.
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalContext, TriageError> {
        let cancel = CancellationToken::new();
        let top_k = self.keyword_top_k;
        let query_keywords = self
            .policy
            .run(CallKind::Search, &cancel, || {
                self.retrieval.extract_keywords(query, top_k)
            })
            .await?;
        let documents = self
            .policy
            .run(CallKind::Search, &cancel, || {
                self.retrieval.similarity_search(query, self.similarity_k)
            })
            .await?;
        let context_keywords = if documents.is_empty() {
            Vec::new()
        } else {
            let joined = documents
                .iter()
                .map(|d| d.content.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            self.policy
                .run(CallKind::Search, &cancel, || {
                    self.retrieval.extract_keywords(&joined, top_k)
                })
                .await?
        };
        Ok(RetrievalContext {
            query_keywords,
            documents,
            context_keywords,
        })
    }

    /// Score `query`, produce the cheap response and append it to `history`.
    pub async fn classify(
        &self,
        query: &str,
        history: &Mutex<ConversationHistory>,
        context: &RetrievalContext,
    ) -> Result<Verdict, TriageError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(TriageError::EmptyQuery);
        }

        let (query_class, relevance) = context.classify(self.in_scope_threshold);
        let force_advanced = self.detector.wants_advanced(query);

        let rendered_history = history.lock().await.render();
        let query_keywords = context.query_keywords.join(", ");
        let context_keywords = context.context_keywords.join(", ");
        let relevance_text = format!("{relevance:.2}");
        let class_text = query_class.to_string();
        let (system, user) = self.prompt.render(&[
            ("history", rendered_history.as_str()),
            ("query", query),
            ("query_keywords", query_keywords.as_str()),
            ("context_keywords", context_keywords.as_str()),
            ("query_class", class_text.as_str()),
            ("relevance", relevance_text.as_str()),
            ("affirm_marker", self.markers.affirm.as_str()),
            ("negative_marker", self.markers.negative.as_str()),
        ]);

        let raw_text = self
            .stream_answer(CompletionRequest::new(CallPurpose::Triage, system, user))
            .await?;
        let parsed = self.markers.parse(&raw_text)?;

        history.lock().await.push(query, parsed.body.clone());

        info!(
            sentinel = %parsed.sentinel,
            class = %query_class,
            relevance,
            force_advanced,
            "triage verdict"
        );

        Ok(Verdict {
            raw_text,
            cheap_response: parsed.body,
            sentinel: parsed.sentinel,
            query_class,
            force_advanced,
            relevance,
        })
    }

    /// Read the triage stream, stopping early on a trailing negative marker.
    async fn stream_answer(&self, request: CompletionRequest) -> Result<String, GatewayError> {
        let cancel = CancellationToken::new();
        let limit = self.policy.timeout_for(CallKind::Triage);
        let deadline = Instant::now() + limit;

        let mut stream = self
            .policy
            .run(CallKind::Triage, &cancel, || self.completion.stream(request.clone()))
            .await?;

        let mut buffer = String::new();
        loop {
            let next = tokio::time::timeout_at(deadline, stream.next())
                .await
                .map_err(|_| GatewayError::Timeout(limit))?;
            match next {
                Some(chunk) => {
                    buffer.push_str(&chunk?);
                    if self.markers.trailing_negative(&buffer, self.negative_window) {
                        debug!(chars = buffer.len(), "negative marker seen, dropping stream");
                        break;
                    }
                }
                None => break,
            }
        }
        Ok(buffer)
    }
}
