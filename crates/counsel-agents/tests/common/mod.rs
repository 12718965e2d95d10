//! Scripted in-process gateways shared by the integration tests.
//!
//! Nothing here talks to a network: completions replay per-purpose scripts,
//! the record store and fact search return fixed rows, and every call is
//! counted so tests can assert which stages ran.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use counsel_agents::config::CounselConfig;
use counsel_agents::gateway::{
    CallPurpose, CompletionGateway, CompletionRequest, FactSearch, RecordStore, RetrievalGateway,
    ScoredDocument, SearchHit, TextStream,
};
use counsel_agents::{Coordinator, DeepBuildPipeline, GatewayError};
use counsel_coordination::{Candidate, PrecedentRecord, SessionArtifactCache};
use futures::stream;

// ── Completion ───────────────────────────────────────────────────────────────

/// Replays scripted replies per call purpose. The last reply of a script is
/// sticky; an unscripted purpose fails with a configuration error.
#[derive(Default)]
pub struct FakeCompletion {
    scripts: Mutex<HashMap<CallPurpose, VecDeque<String>>>,
    calls: Mutex<Vec<CallPurpose>>,
    generation_delay: Duration,
    generating: AtomicUsize,
    max_generating: AtomicUsize,
}

impl FakeCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, purpose: CallPurpose, replies: &[&str]) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(purpose, replies.iter().map(|r| r.to_string()).collect());
        self
    }

    pub fn with_generation_delay(mut self, delay: Duration) -> Self {
        self.generation_delay = delay;
        self
    }

    pub fn count(&self, purpose: CallPurpose) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|p| **p == purpose)
            .count()
    }

    /// Highest number of generation calls seen in flight at once.
    pub fn max_concurrent_generations(&self) -> usize {
        self.max_generating.load(Ordering::SeqCst)
    }

    fn next_reply(&self, purpose: CallPurpose) -> Result<String, GatewayError> {
        self.calls.lock().unwrap().push(purpose);
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts
            .get_mut(&purpose)
            .ok_or_else(|| GatewayError::Configuration(format!("unscripted {purpose}")))?;
        match queue.len() {
            0 => Err(GatewayError::Configuration(format!("empty script {purpose}"))),
            1 => Ok(queue[0].clone()),
            _ => Ok(queue.pop_front().unwrap_or_default()),
        }
    }
}

/// Split into 4-char chunks on char boundaries.
fn chunks(text: &str) -> Vec<Result<String, GatewayError>> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(4)
        .map(|c| Ok(c.iter().collect::<String>()))
        .collect()
}

#[async_trait]
impl CompletionGateway for FakeCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String, GatewayError> {
        self.next_reply(request.purpose)
    }

    async fn stream(&self, request: CompletionRequest) -> Result<TextStream, GatewayError> {
        let reply = self.next_reply(request.purpose)?;
        if request.purpose == CallPurpose::Generate {
            let now = self.generating.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_generating.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.generation_delay).await;
            self.generating.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(Box::pin(stream::iter(chunks(&reply))))
    }
}

// ── Retrieval ────────────────────────────────────────────────────────────────

/// Whitespace keywords and a fixed related-document set.
pub struct FakeRetrieval {
    documents: Vec<String>,
}

impl FakeRetrieval {
    pub fn new(documents: &[&str]) -> Self {
        Self {
            documents: documents.iter().map(|d| d.to_string()).collect(),
        }
    }
}

#[async_trait]
impl RetrievalGateway for FakeRetrieval {
    async fn extract_keywords(&self, text: &str, top_k: usize) -> Result<Vec<String>, GatewayError> {
        let mut out: Vec<String> = Vec::new();
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if word.chars().count() >= 2 && !out.contains(&word) {
                out.push(word);
            }
        }
        out.truncate(top_k);
        Ok(out)
    }

    async fn similarity_search(
        &self,
        _text: &str,
        k: usize,
    ) -> Result<Vec<ScoredDocument>, GatewayError> {
        Ok(self
            .documents
            .iter()
            .take(k)
            .map(|content| ScoredDocument {
                content: content.clone(),
                score: 0.8,
            })
            .collect())
    }
}

// ── Record store ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeRecords {
    pub candidates: Vec<Candidate>,
    pub precedents: Vec<PrecedentRecord>,
    pub candidate_delay: Duration,
    pub candidate_calls: AtomicUsize,
    pub precedent_calls: AtomicUsize,
}

#[async_trait]
impl RecordStore for FakeRecords {
    async fn find_candidates(&self, _keywords: &[String]) -> Result<Vec<Candidate>, GatewayError> {
        self.candidate_calls.fetch_add(1, Ordering::SeqCst);
        if !self.candidate_delay.is_zero() {
            tokio::time::sleep(self.candidate_delay).await;
        }
        Ok(self.candidates.clone())
    }

    async fn find_precedent(
        &self,
        _categories: &[String],
        _titles: &[String],
        _keywords: &[String],
    ) -> Result<Vec<PrecedentRecord>, GatewayError> {
        self.precedent_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.precedents.clone())
    }
}

// ── Fact search ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeSearch {
    pub hits: Vec<SearchHit>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl FactSearch for FakeSearch {
    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hits.clone())
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

pub const LEGAL_QUERY: &str = "deposit return after lease ends";
pub const EVICTION_QUERY: &str = "deposit eviction lease notice period";
pub const INTEREST_QUERY: &str = "lease deposit ends what about the interest owed";
pub const RELATED_DOCUMENT: &str = "deposit return rules when a lease ends early";
pub const DEEP_ANSWER: &str = "The landlord must return the deposit when the lease ends.";

pub const TEMPLATE_JSON: &str = r#"{"summary": "Deposit is returned at lease end.", "explanation": "Under the Housing Lease Act the deposit is due.", "hyperlinks": [{"label": "Housing Lease Act", "url": "https://law.go.kr/hla"}], "ref_question": "When is my deposit returned?"}"#;
pub const STRATEGY_JSON: &str = r#"{"tone": "calm", "structure": "rule then steps", "decision_tree": ["lease ended", "deposit unpaid"], "final_strategy_summary": "Explain the rule, then the remedy.", "recommended_links": []}"#;
pub const REVISED_STRATEGY_JSON: &str = r#"{"tone": "firm", "structure": "rule, remedy, deadline", "decision_tree": ["lease ended"], "final_strategy_summary": "Cite article 3 and the remedy.", "recommended_links": []}"#;
pub const NO_REVISION_JSON: &str = r#"{"needs_revision": false, "reason": "complete"}"#;
pub const NEEDS_REVISION_JSON: &str = r#"{"needs_revision": true, "reason": "misses article 3"}"#;
pub const NO_FIX_JSON: &str = r#"{"needs_fix": false, "reason": "consistent", "fix_suggestion": ""}"#;

pub fn affirm_reply() -> String {
    "You can ask for the deposit back.\n###yes".to_string()
}

pub fn negative_reply() -> String {
    "Please tell me more about the contract. ###no".to_string()
}

pub fn candidate() -> Candidate {
    Candidate {
        id: 42,
        title: "Deposit return".into(),
        question: "When is my deposit returned?".into(),
        answer: "At the end of the lease.".into(),
        category: "housing".into(),
    }
}

pub fn precedent(link: Option<&str>) -> PrecedentRecord {
    PrecedentRecord {
        id: 7,
        case_number: "2019da12345".into(),
        title: "Deposit return claim".into(),
        court: "Supreme Court".into(),
        date: "2020-03-12".into(),
        external_link: link.map(str::to_string),
    }
}

pub fn hit(content: &str) -> SearchHit {
    SearchHit {
        url: "https://law.go.kr/case/1".into(),
        content: content.into(),
    }
}

/// Completion scripted for a full successful deep build.
pub fn happy_completion(triage: &str) -> FakeCompletion {
    FakeCompletion::new()
        .script(CallPurpose::Triage, &[triage])
        .script(CallPurpose::Relevance, &["relevant"])
        .script(CallPurpose::Choose, &["[1]"])
        .script(CallPurpose::Template, &[TEMPLATE_JSON])
        .script(CallPurpose::Strategy, &[STRATEGY_JSON])
        .script(CallPurpose::EvaluateStrategy, &[NO_REVISION_JSON])
        .script(CallPurpose::ReviseStrategy, &[REVISED_STRATEGY_JSON])
        .script(CallPurpose::Generate, &[DEEP_ANSWER])
        .script(CallPurpose::AnswerCritique, &[NO_FIX_JSON])
}

pub fn happy_records() -> FakeRecords {
    FakeRecords {
        candidates: vec![candidate()],
        precedents: vec![precedent(Some("https://casenote.kr/2019da12345"))],
        ..Default::default()
    }
}

pub fn happy_search() -> FakeSearch {
    FakeSearch {
        hits: vec![hit("The court ordered the deposit returned.")],
        ..Default::default()
    }
}

pub fn test_config() -> CounselConfig {
    let mut config = CounselConfig::default();
    config.retry.max_retries = 0;
    config
}

pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub completion: Arc<FakeCompletion>,
    pub records: Arc<FakeRecords>,
    pub search: Arc<FakeSearch>,
}

pub fn harness(
    completion: FakeCompletion,
    records: FakeRecords,
    search: FakeSearch,
    documents: &[&str],
    config: &CounselConfig,
) -> Harness {
    let completion = Arc::new(completion);
    let records = Arc::new(records);
    let search = Arc::new(search);
    let coordinator = Coordinator::new(
        completion.clone(),
        Arc::new(FakeRetrieval::new(documents)),
        records.clone(),
        search.clone(),
        config,
    );
    Harness {
        coordinator: Arc::new(coordinator),
        completion,
        records,
        search,
    }
}

pub struct PipelineHarness {
    pub pipeline: DeepBuildPipeline,
    pub completion: Arc<FakeCompletion>,
    pub records: Arc<FakeRecords>,
    pub search: Arc<FakeSearch>,
}

pub fn pipeline_harness(
    completion: FakeCompletion,
    records: FakeRecords,
    search: FakeSearch,
) -> PipelineHarness {
    let completion = Arc::new(completion);
    let records = Arc::new(records);
    let search = Arc::new(search);
    let pipeline = DeepBuildPipeline::new(
        completion.clone(),
        records.clone(),
        search.clone(),
        SessionArtifactCache::default().shared(),
        &test_config(),
    );
    PipelineHarness {
        pipeline,
        completion,
        records,
        search,
    }
}

pub fn keywords(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_string).collect()
}
