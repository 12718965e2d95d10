//! Stage 5: compose the cached artifacts into the final answer and review it.
//!
//! Callers hold the session's build lock for the whole call.

use counsel_coordination::{SessionKey, Stage};
use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::strategy::link_lines;
use super::{ensure_live, DeepBuildPipeline};
use crate::critique::AnswerReview;
use crate::errors::{BuildError, GatewayError};
use crate::gateway::{CallKind, CallPurpose, CompletionRequest};

/// The deep answer plus its flag-only review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedAnswer {
    pub response: String,
    pub review: AnswerReview,
}

impl DeepBuildPipeline {
    /// Run generation and the answer review for a session prepared for
    /// `query`.
    pub async fn generate(
        &self,
        key: &SessionKey,
        query: &str,
        history: &str,
        cancel: &CancellationToken,
    ) -> Result<GeneratedAnswer, BuildError> {
        let entry = self
            .cache
            .get(key)
            .await
            .filter(|e| e.built_for(query))
            .ok_or(BuildError::NotPrepared)?;
        let (Some(template), Some(strategy), Some(precedent)) =
            (&entry.template, &entry.strategy, &entry.precedent)
        else {
            return Err(BuildError::NotPrepared);
        };
        ensure_live(cancel, Stage::Generate)?;

        let summary = template.linked_summary();
        let explanation = template.linked_explanation();
        let hyperlinks = link_lines(&template.hyperlinks);
        let decision_tree = strategy
            .decision_tree
            .iter()
            .map(|step| format!("  - {step}"))
            .collect::<Vec<_>>()
            .join("\n");
        let recommended_links = link_lines(&strategy.recommended_links);
        let precedent_meta = precedent.record.meta_line();
        let (system, user) = self.prompts.generation.render(&[
            ("history", history),
            ("query", query),
            ("summary", summary.as_str()),
            ("explanation", explanation.as_str()),
            ("ref_question", template.ref_question.as_str()),
            ("hyperlinks", hyperlinks.as_str()),
            ("strategy_summary", strategy.final_strategy_summary.as_str()),
            ("tone", strategy.tone.as_str()),
            ("structure", strategy.structure.as_str()),
            ("decision_tree", decision_tree.as_str()),
            ("recommended_links", recommended_links.as_str()),
            ("precedent_summary", precedent.summary.as_str()),
            ("precedent_link", precedent.source_url.as_str()),
            ("precedent_meta", precedent_meta.as_str()),
        ]);

        let request = CompletionRequest::new(CallPurpose::Generate, system, user);
        let response = self
            .stream_generation(request, cancel)
            .await
            .map_err(|e| BuildError::gateway(Stage::Generate, e))?;

        let review = self.critique.review_answer(query, &response, cancel).await?;
        info!(
            session = %key,
            chars = response.len(),
            needs_fix = review.needs_fix,
            "deep answer generated"
        );
        Ok(GeneratedAnswer { response, review })
    }

    async fn stream_generation(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<String, GatewayError> {
        let limit = self.policy.timeout_for(CallKind::Generation);
        let deadline = Instant::now() + limit;

        let mut stream = self
            .policy
            .run(CallKind::Generation, cancel, || {
                self.completion.stream(request.clone())
            })
            .await?;

        let mut answer = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                next = tokio::time::timeout_at(deadline, stream.next()) => {
                    next.map_err(|_| GatewayError::Timeout(limit))?
                }
            };
            match next {
                Some(chunk) => answer.push_str(&chunk?),
                None => break,
            }
        }

        if answer.trim().is_empty() {
            return Err(GatewayError::Decode("empty generation".to_string()));
        }
        Ok(answer)
    }
}
