//! Critique-Revise Loop.
//!
//! A strategy is checked once against fact-search snippets for the query. If
//! the check asks for changes, exactly one revision is requested and the
//! result is never checked again. Every failure on this path degrades to "no
//! revision"; only cancellation propagates.
//!
//! The same snippets back the flag-only review of the final answer.

use std::sync::Arc;

use counsel_coordination::{Critique, Stage, Strategy};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{BuildError, GatewayError};
use crate::gateway::{
    snippets, CallKind, CallPolicy, CallPurpose, CompletionGateway, CompletionRequest, FactSearch,
};
use crate::parse::parse_json;
use crate::prompts::{PromptTemplates, StagePrompt};

/// Snippets handed to each evaluation.
pub const SNIPPET_LIMIT: usize = 3;

/// Result of evaluating a strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub needs_revision: bool,
    pub reason: String,
    pub snippets: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EvaluationReply {
    #[serde(default)]
    needs_revision: bool,
    #[serde(default)]
    reason: String,
}

/// Flag-only review of a generated answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerReview {
    pub needs_fix: bool,
    pub reason: String,
    pub fix_suggestion: String,
}

/// Keep the value, or log and drop a non-cancellation failure.
fn soften<T>(stage: Stage, purpose: &str, result: Result<T, GatewayError>) -> Result<Option<T>, BuildError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(GatewayError::Cancelled) => Err(BuildError::Cancelled { stage }),
        Err(e) => {
            warn!(stage = %stage, call = purpose, error = %e, "critique call failed, continuing without it");
            Ok(None)
        }
    }
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct CritiqueLoop {
    completion: Arc<dyn CompletionGateway>,
    fact_search: Arc<dyn FactSearch>,
    policy: CallPolicy,
    evaluate_prompt: StagePrompt,
    revise_prompt: StagePrompt,
    review_prompt: StagePrompt,
}

impl CritiqueLoop {
    pub fn new(
        completion: Arc<dyn CompletionGateway>,
        fact_search: Arc<dyn FactSearch>,
        policy: CallPolicy,
        prompts: &PromptTemplates,
    ) -> Self {
        Self {
            completion,
            fact_search,
            policy,
            evaluate_prompt: prompts.evaluate_strategy.clone(),
            revise_prompt: prompts.revise_strategy.clone(),
            review_prompt: prompts.answer_critique.clone(),
        }
    }

    /// First [`SNIPPET_LIMIT`] non-empty fact-search contents for `query`.
    pub async fn fact_snippets(
        &self,
        stage: Stage,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, BuildError> {
        let hits = self
            .policy
            .run(CallKind::Search, cancel, || self.fact_search.search(query))
            .await;
        Ok(soften(stage, "fact_search", hits)?
            .map(|hits| snippets(&hits, SNIPPET_LIMIT))
            .unwrap_or_default())
    }

    /// Judge `strategy` against `snippets`. No snippets or an unusable reply
    /// means no revision.
    pub async fn evaluate(
        &self,
        strategy: &Strategy,
        snippets: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<Evaluation, BuildError> {
        if snippets.is_empty() {
            debug!("no fact-check snippets, skipping strategy evaluation");
            return Ok(Evaluation::default());
        }

        let rendered = bullet_list(&snippets);
        let (system, user) = self.evaluate_prompt.render(&[
            ("strategy_summary", strategy.final_strategy_summary.as_str()),
            ("snippets", rendered.as_str()),
        ]);
        let request = CompletionRequest::new(CallPurpose::EvaluateStrategy, system, user);
        let reply = self
            .policy
            .run(CallKind::Stage, cancel, || self.completion.complete(request.clone()))
            .await;
        let Some(text) = soften(Stage::Strategy, "evaluate_strategy", reply)? else {
            return Ok(Evaluation {
                snippets,
                ..Default::default()
            });
        };

        match parse_json::<EvaluationReply>(&text) {
            Ok(reply) => Ok(Evaluation {
                needs_revision: reply.needs_revision,
                reason: reply.reason,
                snippets,
            }),
            Err(e) => {
                warn!(error = %e, "unparsable strategy evaluation, treating as no revision");
                Ok(Evaluation {
                    snippets,
                    ..Default::default()
                })
            }
        }
    }

    /// One revision attempt. `None` when the reply is unusable.
    pub async fn revise(
        &self,
        strategy: &Strategy,
        snippets: &[String],
        cancel: &CancellationToken,
    ) -> Result<Option<Strategy>, BuildError> {
        let rendered = bullet_list(snippets);
        let (system, user) = self.revise_prompt.render(&[
            ("strategy_summary", strategy.final_strategy_summary.as_str()),
            ("snippets", rendered.as_str()),
        ]);
        let request = CompletionRequest::new(CallPurpose::ReviseStrategy, system, user);
        let reply = self
            .policy
            .run(CallKind::Stage, cancel, || self.completion.complete(request.clone()))
            .await;
        let Some(text) = soften(Stage::Strategy, "revise_strategy", reply)? else {
            return Ok(None);
        };
        match parse_json::<Strategy>(&text) {
            Ok(revised) => Ok(Some(revised)),
            Err(e) => {
                warn!(error = %e, "unparsable strategy revision, keeping original");
                Ok(None)
            }
        }
    }

    /// Evaluate once and revise at most once.
    pub async fn refine(
        &self,
        query: &str,
        strategy: Strategy,
        cancel: &CancellationToken,
    ) -> Result<Strategy, BuildError> {
        let snippets = self.fact_snippets(Stage::Strategy, query, cancel).await?;
        let evaluation = self.evaluate(&strategy, snippets, cancel).await?;

        if !evaluation.needs_revision {
            return Ok(Strategy {
                critique: Critique {
                    needs_revision: false,
                    reason: evaluation.reason,
                    revised: false,
                },
                ..strategy
            });
        }

        info!(reason = %evaluation.reason, "strategy flagged, requesting one revision");
        match self.revise(&strategy, &evaluation.snippets, cancel).await? {
            Some(revised) => Ok(Strategy {
                critique: Critique {
                    needs_revision: true,
                    reason: evaluation.reason,
                    revised: true,
                },
                ..revised
            }),
            None => Ok(Strategy {
                critique: Critique {
                    needs_revision: true,
                    reason: evaluation.reason,
                    revised: false,
                },
                ..strategy
            }),
        }
    }

    /// Flag problems in a generated answer. Never alters the answer.
    pub async fn review_answer(
        &self,
        query: &str,
        answer: &str,
        cancel: &CancellationToken,
    ) -> Result<AnswerReview, BuildError> {
        let snippets = self.fact_snippets(Stage::Generate, query, cancel).await?;
        if snippets.is_empty() {
            return Ok(AnswerReview::default());
        }

        let rendered = bullet_list(&snippets);
        let (system, user) = self.review_prompt.render(&[
            ("query", query),
            ("answer", answer),
            ("snippets", rendered.as_str()),
        ]);
        let request = CompletionRequest::new(CallPurpose::AnswerCritique, system, user);
        let reply = self
            .policy
            .run(CallKind::Stage, cancel, || self.completion.complete(request.clone()))
            .await;
        let Some(text) = soften(Stage::Generate, "answer_critique", reply)? else {
            return Ok(AnswerReview::default());
        };
        Ok(parse_json::<AnswerReview>(&text).unwrap_or_else(|e| {
            warn!(error = %e, "unparsable answer critique, treating as no fix");
            AnswerReview::default()
        }))
    }
}
