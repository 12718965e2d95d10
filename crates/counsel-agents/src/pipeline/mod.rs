//! Deep-Build Pipeline.
//!
//! ```text
//! prepare:  qualify ─► template ─► strategy (+critique) ─► precedent
//!              │            │              │                    │
//!              └────────────┴── each artifact cached on success ┘
//! generate: (behind the build lock) compose ─► stream ─► answer review
//! ```
//!
//! Every stage first consults the session cache and is skipped when its
//! artifact is already there for the same question. Semantic misses end the build with a
//! [`BuildStatus`]; upstream failures are [`BuildError`]s tagged with the
//! stage. The cancellation token is checked before each stage and raced
//! against every call.

mod generate;
mod precedent;
mod qualify;
mod strategy;
mod template;

use std::sync::Arc;
use std::time::Duration;

use counsel_coordination::{ArtifactPatch, CacheEntry, SessionKey, SharedArtifactCache, Stage};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::CounselConfig;
use crate::critique::CritiqueLoop;
use crate::errors::BuildError;
use crate::gateway::{CallPolicy, CompletionGateway, FactSearch, RecordStore};
use crate::prompts::PromptTemplates;

pub use generate::GeneratedAnswer;

/// Terminal status of a deep build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Ok,
    FailQualifier,
    NotFound,
    PrecedentMissing,
    Cancelled,
    /// A stage failed upstream; details are in the log.
    Failed,
}

impl BuildStatus {
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::FailQualifier => "fail_qualifier",
            Self::NotFound => "not_found",
            Self::PrecedentMissing => "precedent_missing",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of one stage: its artifact, or the status that ends the build.
pub(crate) enum StageOutcome<T> {
    Done(T),
    Stop(BuildStatus),
}

fn ensure_live(cancel: &CancellationToken, stage: Stage) -> Result<(), BuildError> {
    if cancel.is_cancelled() {
        return Err(BuildError::Cancelled { stage });
    }
    Ok(())
}

pub struct DeepBuildPipeline {
    completion: Arc<dyn CompletionGateway>,
    records: Arc<dyn RecordStore>,
    fact_search: Arc<dyn FactSearch>,
    cache: SharedArtifactCache,
    critique: CritiqueLoop,
    policy: CallPolicy,
    prompts: PromptTemplates,
    ttl: Duration,
}

impl DeepBuildPipeline {
    pub fn new(
        completion: Arc<dyn CompletionGateway>,
        records: Arc<dyn RecordStore>,
        fact_search: Arc<dyn FactSearch>,
        cache: SharedArtifactCache,
        config: &CounselConfig,
    ) -> Self {
        let policy = CallPolicy::new(config.timeouts.clone(), config.retry.clone());
        Self {
            critique: CritiqueLoop::new(
                completion.clone(),
                fact_search.clone(),
                policy.clone(),
                &config.prompts,
            ),
            completion,
            records,
            fact_search,
            cache,
            policy,
            prompts: config.prompts.clone(),
            ttl: config.cache.ttl(),
        }
    }

    pub fn cache(&self) -> &SharedArtifactCache {
        &self.cache
    }

    /// Run stages 1-4, skipping whatever the cache already holds.
    ///
    /// Cancellation is reported as [`BuildStatus::Cancelled`]; artifacts
    /// stored before it stay cached.
    pub async fn prepare(
        &self,
        key: &SessionKey,
        query: &str,
        keywords: &[String],
        cancel: &CancellationToken,
    ) -> Result<BuildStatus, BuildError> {
        let result = self.run_prepare(key, query, keywords, cancel).await;
        match result {
            Err(BuildError::Cancelled { stage }) => {
                info!(session = %key, stage = %stage, "deep build cancelled");
                Ok(BuildStatus::Cancelled)
            }
            Ok(status) => {
                info!(session = %key, status = %status, "deep build prepared");
                Ok(status)
            }
            Err(e) => Err(e),
        }
    }

    async fn run_prepare(
        &self,
        key: &SessionKey,
        query: &str,
        keywords: &[String],
        cancel: &CancellationToken,
    ) -> Result<BuildStatus, BuildError> {
        let candidate = match self.cached(key, query, Stage::Qualify, |e| e.candidate).await {
            Some(candidate) => candidate,
            None => {
                ensure_live(cancel, Stage::Qualify)?;
                match self.qualify(query, keywords, cancel).await? {
                    StageOutcome::Done(candidate) => self
                        .store(key, query, ArtifactPatch::candidate(candidate.clone()))
                        .await
                        .and_then(|e| e.candidate)
                        .unwrap_or(candidate),
                    StageOutcome::Stop(status) => return Ok(status),
                }
            }
        };

        let template = match self.cached(key, query, Stage::Template, |e| e.template).await {
            Some(template) => template,
            None => {
                ensure_live(cancel, Stage::Template)?;
                let template = self.plan_template(query, &candidate, cancel).await?;
                self.store(key, query, ArtifactPatch::template(template.clone()))
                    .await
                    .and_then(|e| e.template)
                    .unwrap_or(template)
            }
        };

        if self
            .cached(key, query, Stage::Strategy, |e| e.strategy)
            .await
            .is_none()
        {
            ensure_live(cancel, Stage::Strategy)?;
            let strategy = self.plan_strategy(query, &template, cancel).await?;
            self.store(key, query, ArtifactPatch::strategy(strategy)).await;
        }

        if self
            .cached(key, query, Stage::Precedent, |e| e.precedent)
            .await
            .is_none()
        {
            ensure_live(cancel, Stage::Precedent)?;
            match self.retrieve_precedent(&candidate, keywords, cancel).await? {
                StageOutcome::Done(precedent) => {
                    self.store(key, query, ArtifactPatch::precedent(precedent)).await;
                }
                StageOutcome::Stop(status) => return Ok(status),
            }
        }

        Ok(BuildStatus::Ok)
    }

    /// Cached artifact for `stage`, if the live entry was built for `query`.
    async fn cached<T>(
        &self,
        key: &SessionKey,
        query: &str,
        stage: Stage,
        pick: impl FnOnce(CacheEntry) -> Option<T>,
    ) -> Option<T> {
        let found = self
            .cache
            .get(key)
            .await
            .filter(|e| e.built_for(query))
            .and_then(pick);
        if found.is_some() {
            debug!(session = %key, stage = %stage, "artifact cached, skipping stage");
        }
        found
    }

    /// Merge one artifact. `None` when the entry belongs to another question
    /// and the artifact was not kept.
    async fn store(&self, key: &SessionKey, query: &str, patch: ArtifactPatch) -> Option<CacheEntry> {
        let entry = self
            .cache
            .put_or_merge(key, patch.for_query(query), Some(self.ttl))
            .await;
        if !entry.built_for(query) {
            debug!(session = %key, "entry holds another question, artifact not cached");
            return None;
        }
        Some(entry)
    }
}
