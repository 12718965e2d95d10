//! Stage 1: pick the prior consultation that matches the query.

use counsel_coordination::{Candidate, Stage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{BuildStatus, DeepBuildPipeline, StageOutcome};
use crate::errors::BuildError;
use crate::gateway::{CallKind, CallPurpose, CompletionRequest};
use crate::parse::{parse_choice, parse_relevance, Choice};

/// Numbered `title / question` list, in store order.
fn numbered(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}\n   {}", i + 1, c.title, c.question))
        .collect::<Vec<_>>()
        .join("\n")
}

impl DeepBuildPipeline {
    pub(crate) async fn qualify(
        &self,
        query: &str,
        keywords: &[String],
        cancel: &CancellationToken,
    ) -> Result<StageOutcome<Candidate>, BuildError> {
        let stage = Stage::Qualify;
        let mut candidates = self
            .policy
            .run(CallKind::Search, cancel, || self.records.find_candidates(keywords))
            .await
            .map_err(|e| BuildError::gateway(stage, e))?;
        if candidates.is_empty() {
            info!(keywords = ?keywords, "no candidate consultations");
            return Ok(StageOutcome::Stop(BuildStatus::FailQualifier));
        }

        let listing = numbered(&candidates);
        let (system, user) = self
            .prompts
            .relevance
            .render(&[("query", query), ("candidates", listing.as_str())]);
        let request = CompletionRequest::new(CallPurpose::Relevance, system, user);
        let verdict = self
            .policy
            .run(CallKind::Stage, cancel, || self.completion.complete(request.clone()))
            .await
            .map_err(|e| BuildError::gateway(stage, e))?;
        if !parse_relevance(&verdict) {
            info!(reply = %verdict.trim(), "candidates judged irrelevant");
            return Ok(StageOutcome::Stop(BuildStatus::FailQualifier));
        }

        let (system, user) = self
            .prompts
            .choose
            .render(&[("query", query), ("candidates", listing.as_str())]);
        let request = CompletionRequest::new(CallPurpose::Choose, system, user);
        let reply = self
            .policy
            .run(CallKind::Stage, cancel, || self.completion.complete(request.clone()))
            .await
            .map_err(|e| BuildError::gateway(stage, e))?;

        match parse_choice(&reply, candidates.len()) {
            Choice::Selected(index) => {
                let chosen = candidates.swap_remove(index);
                debug!(id = chosen.id, title = %chosen.title, "candidate selected");
                Ok(StageOutcome::Done(chosen))
            }
            Choice::NoneFits | Choice::Invalid => {
                info!(reply = %reply.trim(), "no usable candidate choice");
                Ok(StageOutcome::Stop(BuildStatus::FailQualifier))
            }
        }
    }
}
