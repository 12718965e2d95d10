//! Dual-Pipeline Coordinator.
//!
//! One call to [`Coordinator::handle_turn`] per user turn:
//!
//! ```text
//!            ┌─► triage.classify ─► escalation engine ─┐
//! retrieve ──┤                                         ├─► TurnResult
//!            └─► pipeline.prepare (speculative task) ──┘
//!                      │
//!                      └─ escalated: await, take build lock, generate
//! ```
//!
//! Out-of-scope and negative turns cancel the speculative build. In-scope
//! turns that do not escalate leave it running so later turns hit the cache.
//! The cheap response is always returned; deep-path failures only change
//! `build_status`.
//!
//! A completed generation clears the session's artifacts. Session state
//! lives for the cache TTL and is swept by [`Coordinator::spawn_janitor`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use counsel_coordination::{
    Acquire, ArtifactPatch, BuildLocks, BusyPolicy, ConversationHistory, EscalationConfig,
    EscalationEngine, EscalationState, SessionArtifactCache, SessionKey, SharedArtifactCache,
    SharedBuildLocks,
};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CounselConfig;
use crate::critique::AnswerReview;
use crate::errors::{BuildError, TriageError, TurnError};
use crate::gateway::{CompletionGateway, FactSearch, RecordStore, RetrievalGateway};
use crate::messages;
use crate::pipeline::{BuildStatus, DeepBuildPipeline};
use crate::triage::TriageClassifier;

/// Outcome class of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Ok,
    NonlegalSkipped,
    NegativeTriggered,
    WaitForBuild,
    CachedAdvancedReturned,
}

impl std::fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::NonlegalSkipped => "nonlegal_skipped",
            Self::NegativeTriggered => "negative_triggered",
            Self::WaitForBuild => "wait_for_build",
            Self::CachedAdvancedReturned => "cached_advanced_returned",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    pub cheap_response: String,
    pub escalated: bool,
    pub deep_response: Option<String>,
    pub status: TurnStatus,
    /// Set whenever the turn waited on the deep build.
    pub build_status: Option<BuildStatus>,
    pub review: Option<AnswerReview>,
    /// User-facing explanation of a non-`ok` outcome.
    pub notice: Option<&'static str>,
}

impl TurnResult {
    fn cheap(cheap_response: String, status: TurnStatus) -> Self {
        Self {
            cheap_response,
            escalated: false,
            deep_response: None,
            status,
            build_status: None,
            review: None,
            notice: messages::for_turn(status),
        }
    }

    fn escalated(cheap_response: String, status: TurnStatus, build_status: BuildStatus) -> Self {
        Self {
            cheap_response,
            escalated: true,
            deep_response: None,
            status,
            build_status: Some(build_status),
            review: None,
            notice: messages::for_turn(status).or(messages::for_build(build_status)),
        }
    }
}

/// Per-session mutable state.
#[derive(Debug)]
struct SessionState {
    escalation: Mutex<EscalationState>,
    history: Mutex<ConversationHistory>,
    expires_at: Instant,
}

impl SessionState {
    fn new(history_turns: usize, ttl: Duration) -> Self {
        Self {
            escalation: Mutex::new(EscalationState::new()),
            history: Mutex::new(ConversationHistory::new(history_turns)),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Log a failed build and report it as [`BuildStatus::Failed`].
fn fold_build_error(key: &SessionKey, result: Result<BuildStatus, BuildError>) -> BuildStatus {
    result.unwrap_or_else(|e| {
        warn!(
            session = %key,
            stage = %e.stage(),
            category = %e.retry_category(),
            error = %e,
            "deep build failed"
        );
        BuildStatus::Failed
    })
}

/// What one sweep of [`Coordinator::purge_expired`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub sessions: usize,
    pub cache_entries: usize,
    pub locks: usize,
}

pub struct Coordinator {
    triage: TriageClassifier,
    pipeline: Arc<DeepBuildPipeline>,
    engine: EscalationEngine,
    locks: SharedBuildLocks,
    sessions: RwLock<HashMap<SessionKey, Arc<SessionState>>>,
    busy_policy: BusyPolicy,
    lock_wait: Duration,
    history_turns: usize,
    session_ttl: Duration,
}

impl Coordinator {
    pub fn new(
        completion: Arc<dyn CompletionGateway>,
        retrieval: Arc<dyn RetrievalGateway>,
        records: Arc<dyn RecordStore>,
        fact_search: Arc<dyn FactSearch>,
        config: &CounselConfig,
    ) -> Self {
        let cache = SessionArtifactCache::new(config.cache.ttl()).shared();
        Self {
            triage: TriageClassifier::new(completion.clone(), retrieval, config),
            pipeline: Arc::new(DeepBuildPipeline::new(
                completion,
                records,
                fact_search,
                cache,
                config,
            )),
            engine: EscalationEngine::with_config(EscalationConfig {
                affirm_threshold: config.escalation.affirm_threshold,
            }),
            locks: BuildLocks::new().shared(),
            sessions: RwLock::new(HashMap::new()),
            busy_policy: config.busy_policy,
            lock_wait: config.timeouts.lock_wait(),
            history_turns: config.escalation.history_turns,
            session_ttl: config.cache.ttl(),
        }
    }

    pub fn cache(&self) -> &SharedArtifactCache {
        self.pipeline.cache()
    }

    pub fn locks(&self) -> &SharedBuildLocks {
        &self.locks
    }

    pub fn busy_policy(&self) -> BusyPolicy {
        self.busy_policy
    }

    /// Current escalation state for `key`, if the session exists and has not
    /// expired.
    pub async fn escalation_state(&self, key: &SessionKey) -> Option<EscalationState> {
        let session = self
            .sessions
            .read()
            .await
            .get(key)
            .filter(|s| !s.is_expired())
            .cloned()?;
        let state = *session.escalation.lock().await;
        Some(state)
    }

    /// Live sessions, expired ones included until swept.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Session state for `key`. An expired session starts over.
    async fn session(&self, key: &SessionKey) -> Arc<SessionState> {
        if let Some(existing) = self.sessions.read().await.get(key) {
            if !existing.is_expired() {
                return existing.clone();
            }
        }
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(key.clone())
            .or_insert_with(|| Arc::new(SessionState::new(self.history_turns, self.session_ttl)));
        if session.is_expired() {
            info!(session = %key, "session expired, starting over");
            *session = Arc::new(SessionState::new(self.history_turns, self.session_ttl));
        }
        session.clone()
    }

    /// Drop expired sessions and cache entries, and build locks nobody holds.
    pub async fn purge_expired(&self) -> PurgeReport {
        let sessions = {
            let mut sessions = self.sessions.write().await;
            let before = sessions.len();
            sessions.retain(|_, s| !s.is_expired());
            before - sessions.len()
        };
        let report = PurgeReport {
            sessions,
            cache_entries: self.pipeline.cache().purge_expired().await,
            locks: self.locks.prune_idle(),
        };
        if report != PurgeReport::default() {
            debug!(
                sessions = report.sessions,
                cache_entries = report.cache_entries,
                locks = report.locks,
                "purged idle session state"
            );
        }
        report
    }

    /// Run [`purge_expired`](Self::purge_expired) every `every` until the
    /// coordinator is dropped.
    pub fn spawn_janitor(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let coordinator = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                coordinator.purge_expired().await;
            }
        })
    }

    /// Start stages 1-4 in the background. Errors are logged and folded into
    /// [`BuildStatus::Failed`].
    fn spawn_prepare(
        &self,
        key: &SessionKey,
        query: &str,
        keywords: Vec<String>,
        cancel: CancellationToken,
    ) -> JoinHandle<BuildStatus> {
        let pipeline = Arc::clone(&self.pipeline);
        let key = key.clone();
        let query = query.to_string();
        tokio::spawn(async move {
            let result = pipeline.prepare(&key, &query, &keywords, &cancel).await;
            fold_build_error(&key, result)
        })
    }

    /// Answer one user turn.
    pub async fn handle_turn(&self, query: &str, session_key: &str) -> Result<TurnResult, TurnError> {
        let key = SessionKey::new(session_key)?;
        let query = query.trim();
        if query.is_empty() {
            return Err(TriageError::EmptyQuery.into());
        }
        let session = self.session(&key).await;

        let context = self.triage.retrieve(query).await?;

        let cancel = CancellationToken::new();
        let build = self.spawn_prepare(&key, query, context.query_keywords.clone(), cancel.clone());

        let verdict = self
            .triage
            .classify(query, &session.history, &context)
            .await
            .inspect_err(|e| error!(session = %key, error = %e, "triage failed"))?;

        if !verdict.is_in_scope() {
            cancel.cancel();
            info!(session = %key, relevance = verdict.relevance, "out of scope, deep build cancelled");
            return Ok(TurnResult::cheap(verdict.cheap_response, TurnStatus::NonlegalSkipped));
        }

        let decision = {
            let mut state = session.escalation.lock().await;
            self.engine.decide(&mut state, &verdict)
        };
        info!(
            session = %key,
            escalate = decision.escalate,
            reason = ?decision.reason,
            state = %decision.state,
            "escalation decision"
        );

        if verdict.is_negative() {
            cancel.cancel();
            return Ok(TurnResult::cheap(verdict.cheap_response, TurnStatus::NegativeTriggered));
        }
        if !decision.escalate {
            // Detached: the build keeps filling the cache for later turns.
            drop(build);
            return Ok(TurnResult::cheap(verdict.cheap_response, TurnStatus::Ok));
        }

        self.pipeline
            .cache()
            .put_or_merge(&key, ArtifactPatch::escalated(), None)
            .await;

        let build_status = match build.await {
            Ok(status) => status,
            Err(e) => {
                error!(session = %key, error = %e, "deep build task panicked");
                BuildStatus::Failed
            }
        };
        if !build_status.is_ok() {
            return Ok(TurnResult::escalated(
                verdict.cheap_response,
                TurnStatus::Ok,
                build_status,
            ));
        }

        self.generate_under_lock(
            &key,
            &session,
            query,
            &context.query_keywords,
            verdict.cheap_response,
            &cancel,
        )
        .await
    }

    async fn generate_under_lock(
        &self,
        key: &SessionKey,
        session: &SessionState,
        query: &str,
        keywords: &[String],
        cheap_response: String,
        cancel: &CancellationToken,
    ) -> Result<TurnResult, TurnError> {
        let mut permit = match self.locks.acquire(key, self.busy_policy, self.lock_wait).await {
            Acquire::Acquired(permit) => permit,
            Acquire::Busy => {
                info!(session = %key, policy = %self.busy_policy, "build lock busy");
                return Ok(TurnResult::escalated(
                    cheap_response,
                    TurnStatus::WaitForBuild,
                    BuildStatus::Ok,
                ));
            }
        };

        if let Some(peer) = permit.peer_result().filter(|peer| peer.query == query) {
            info!(session = %key, "returning answer generated by a concurrent turn");
            let mut result = TurnResult::escalated(
                cheap_response,
                TurnStatus::CachedAdvancedReturned,
                BuildStatus::Ok,
            );
            result.deep_response = Some(peer.response.clone());
            session.escalation.lock().await.reset();
            return Ok(result);
        }

        let cache = self.pipeline.cache();
        let prepared = cache
            .get(key)
            .await
            .is_some_and(|entry| entry.is_prepared_for(query));
        if !prepared {
            // A peer generated and cleared, or the artifacts answer another question.
            info!(session = %key, "rebuilding artifacts under the build lock");
            cache.clear(key).await;
            cache.put_or_merge(key, ArtifactPatch::escalated(), None).await;
            let result = self.pipeline.prepare(key, query, keywords, cancel).await;
            let status = fold_build_error(key, result);
            if !status.is_ok() {
                return Ok(TurnResult::escalated(cheap_response, TurnStatus::Ok, status));
            }
        }

        let history = session.history.lock().await.render();
        match self.pipeline.generate(key, query, &history, cancel).await {
            Ok(answer) => {
                permit.record(query, answer.response.clone(), answer.review.needs_fix);
                session.escalation.lock().await.reset();
                cache.clear(key).await;
                let mut result =
                    TurnResult::escalated(cheap_response, TurnStatus::Ok, BuildStatus::Ok);
                result.deep_response = Some(answer.response);
                result.review = Some(answer.review);
                Ok(result)
            }
            Err(e) => {
                warn!(
                    session = %key,
                    stage = %e.stage(),
                    category = %e.retry_category(),
                    error = %e,
                    "generation failed"
                );
                Ok(TurnResult::escalated(
                    cheap_response,
                    TurnStatus::Ok,
                    BuildStatus::Failed,
                ))
            }
        }
    }
}
