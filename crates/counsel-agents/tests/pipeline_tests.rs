//! Deep-build pipeline stages against scripted gateways.

mod common;

use std::sync::atomic::Ordering;

use common::*;
use counsel_agents::gateway::CallPurpose;
use counsel_agents::{BuildError, BuildStatus};
use counsel_coordination::{PrecedentStatus, SessionKey};
use tokio_util::sync::CancellationToken;

fn key() -> SessionKey {
    SessionKey::new("pipeline-session").unwrap()
}

// ── Prepare ──────────────────────────────────────────────────────────────────

/// Test: a full prepare stores every artifact once.
#[tokio::test]
async fn test_prepare_populates_cache() {
    let h = pipeline_harness(happy_completion("unused"), happy_records(), happy_search());
    let status = h
        .pipeline
        .prepare(&key(), LEGAL_QUERY, &keywords(LEGAL_QUERY), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, BuildStatus::Ok);

    let entry = h.pipeline.cache().get(&key()).await.unwrap();
    assert!(entry.is_prepared());
    assert_eq!(entry.candidate.as_ref().map(|c| c.id), Some(42));
    let precedent = entry.precedent.unwrap();
    assert_eq!(precedent.status, PrecedentStatus::Ok);
    assert_eq!(precedent.summary, "The court ordered the deposit returned.");
    assert_eq!(precedent.source_url, "https://law.go.kr/case/1");
    assert_eq!(precedent.hyperlinks.len(), 1);
}

/// Test: two sequential builds for the same key call each stage at most once.
#[tokio::test]
async fn test_sequential_builds_are_idempotent() {
    let h = pipeline_harness(happy_completion("unused"), happy_records(), happy_search());
    let cancel = CancellationToken::new();
    let kw = keywords(LEGAL_QUERY);
    for _ in 0..2 {
        let status = h.pipeline.prepare(&key(), LEGAL_QUERY, &kw, &cancel).await.unwrap();
        assert_eq!(status, BuildStatus::Ok);
    }

    assert_eq!(h.records.candidate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.records.precedent_calls.load(Ordering::SeqCst), 1);
    for purpose in [
        CallPurpose::Relevance,
        CallPurpose::Choose,
        CallPurpose::Template,
        CallPurpose::Strategy,
        CallPurpose::EvaluateStrategy,
    ] {
        assert_eq!(h.completion.count(purpose), 1, "{purpose} called twice");
    }
}

/// Test: artifacts cached for one question are not reused for another.
#[tokio::test]
async fn test_cached_artifacts_scoped_to_question() {
    let h = pipeline_harness(happy_completion("unused"), happy_records(), happy_search());
    let cancel = CancellationToken::new();
    h.pipeline
        .prepare(&key(), LEGAL_QUERY, &keywords(LEGAL_QUERY), &cancel)
        .await
        .unwrap();
    let status = h
        .pipeline
        .prepare(&key(), EVICTION_QUERY, &keywords(EVICTION_QUERY), &cancel)
        .await
        .unwrap();
    assert_eq!(status, BuildStatus::Ok);
    assert_eq!(h.records.candidate_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.completion.count(CallPurpose::Template), 2);

    // The entry keeps the first question's artifacts.
    let entry = h.pipeline.cache().get(&key()).await.unwrap();
    assert!(entry.is_prepared_for(LEGAL_QUERY));
    assert!(!entry.built_for(EVICTION_QUERY));
}

/// Test: no candidates short-circuits with fail_qualifier before any
/// completion call.
#[tokio::test]
async fn test_no_candidates_fail_qualifier() {
    let records = FakeRecords {
        candidates: vec![],
        ..happy_records()
    };
    let h = pipeline_harness(happy_completion("unused"), records, happy_search());
    let status = h
        .pipeline
        .prepare(&key(), LEGAL_QUERY, &keywords(LEGAL_QUERY), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, BuildStatus::FailQualifier);
    assert_eq!(h.records.precedent_calls.load(Ordering::SeqCst), 0);
    for purpose in [
        CallPurpose::Relevance,
        CallPurpose::Template,
        CallPurpose::Strategy,
        CallPurpose::Generate,
    ] {
        assert_eq!(h.completion.count(purpose), 0);
    }
    assert!(h.pipeline.cache().get(&key()).await.is_none());
}

/// Test: irrelevant candidates and empty or zero choices fail the qualifier.
#[tokio::test]
async fn test_relevance_and_choice_misses_fail_qualifier() {
    let cases = [
        ("irrelevant", "[1]"),
        ("relevant", "[]"),
        ("relevant", "[0]"),
        ("relevant", "[5]"),
        ("relevant", "the first one"),
    ];
    for (relevance, choice) in cases {
        let completion = happy_completion("unused")
            .script(CallPurpose::Relevance, &[relevance])
            .script(CallPurpose::Choose, &[choice]);
        let h = pipeline_harness(completion, happy_records(), happy_search());
        let status = h
            .pipeline
            .prepare(&key(), LEGAL_QUERY, &keywords(LEGAL_QUERY), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            status,
            BuildStatus::FailQualifier,
            "relevance={relevance} choice={choice}"
        );
        assert_eq!(h.completion.count(CallPurpose::Template), 0);
    }
}

/// Test: a flagged strategy is revised exactly once and marked revised.
#[tokio::test]
async fn test_flagged_strategy_revised_once() {
    let completion = happy_completion("unused")
        .script(CallPurpose::EvaluateStrategy, &[NEEDS_REVISION_JSON]);
    let h = pipeline_harness(completion, happy_records(), happy_search());
    let status = h
        .pipeline
        .prepare(&key(), LEGAL_QUERY, &keywords(LEGAL_QUERY), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, BuildStatus::Ok);

    let strategy = h.pipeline.cache().get(&key()).await.unwrap().strategy.unwrap();
    assert!(strategy.critique.needs_revision);
    assert!(strategy.critique.revised);
    assert_eq!(strategy.critique.reason, "misses article 3");
    assert_eq!(strategy.final_strategy_summary, "Cite article 3 and the remedy.");
    assert_eq!(h.completion.count(CallPurpose::EvaluateStrategy), 1);
    assert_eq!(h.completion.count(CallPurpose::ReviseStrategy), 1);
}

/// Test: no fact-check snippets means no evaluation and no revision.
#[tokio::test]
async fn test_no_snippets_skip_critique() {
    let h = pipeline_harness(
        happy_completion("unused"),
        happy_records(),
        FakeSearch::default(),
    );
    h.pipeline
        .prepare(&key(), LEGAL_QUERY, &keywords(LEGAL_QUERY), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(h.completion.count(CallPurpose::EvaluateStrategy), 0);
    let entry = h.pipeline.cache().get(&key()).await.unwrap();
    assert!(!entry.strategy.unwrap().critique.revised);
}

/// Test: precedent misses map to their statuses and keep earlier artifacts.
#[tokio::test]
async fn test_precedent_statuses() {
    let records = FakeRecords {
        precedents: vec![],
        ..happy_records()
    };
    let h = pipeline_harness(happy_completion("unused"), records, happy_search());
    let status = h
        .pipeline
        .prepare(&key(), LEGAL_QUERY, &keywords(LEGAL_QUERY), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, BuildStatus::NotFound);

    let records = FakeRecords {
        precedents: vec![precedent(Some("  "))],
        ..happy_records()
    };
    let h = pipeline_harness(happy_completion("unused"), records, happy_search());
    let status = h
        .pipeline
        .prepare(&key(), LEGAL_QUERY, &keywords(LEGAL_QUERY), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, BuildStatus::PrecedentMissing);
    let entry = h.pipeline.cache().get(&key()).await.unwrap();
    assert!(entry.template.is_some() && entry.strategy.is_some());
    assert!(entry.precedent.is_none());
}

/// Test: a template reply without JSON is a typed template-stage failure.
#[tokio::test]
async fn test_template_parse_failure_is_typed() {
    let completion = happy_completion("unused").script(CallPurpose::Template, &["plain prose"]);
    let h = pipeline_harness(completion, happy_records(), happy_search());
    let err = h
        .pipeline
        .prepare(&key(), LEGAL_QUERY, &keywords(LEGAL_QUERY), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::Parse { .. }));
    assert_eq!(err.stage().to_string(), "template");
    let entry = h.pipeline.cache().get(&key()).await.unwrap();
    assert!(entry.candidate.is_some());
    assert!(entry.template.is_none());
}

/// Test: a cancelled token stops the build before its first stage.
#[tokio::test]
async fn test_cancelled_before_start() {
    let h = pipeline_harness(happy_completion("unused"), happy_records(), happy_search());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let status = h
        .pipeline
        .prepare(&key(), LEGAL_QUERY, &keywords(LEGAL_QUERY), &cancel)
        .await
        .unwrap();
    assert_eq!(status, BuildStatus::Cancelled);
    assert_eq!(h.records.candidate_calls.load(Ordering::SeqCst), 0);
}

// ── Generate ─────────────────────────────────────────────────────────────────

/// Test: generation refuses to run before prepare finished.
#[tokio::test]
async fn test_generate_requires_prepared_entry() {
    let h = pipeline_harness(happy_completion("unused"), happy_records(), happy_search());
    let err = h
        .pipeline
        .generate(&key(), LEGAL_QUERY, "(none)", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::NotPrepared));
    assert_eq!(h.completion.count(CallPurpose::Generate), 0);
}

/// Test: generation refuses artifacts prepared for a different question.
#[tokio::test]
async fn test_generate_rejects_other_question() {
    let h = pipeline_harness(happy_completion("unused"), happy_records(), happy_search());
    let cancel = CancellationToken::new();
    h.pipeline
        .prepare(&key(), LEGAL_QUERY, &keywords(LEGAL_QUERY), &cancel)
        .await
        .unwrap();
    let err = h
        .pipeline
        .generate(&key(), EVICTION_QUERY, "(none)", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::NotPrepared));
    assert_eq!(h.completion.count(CallPurpose::Generate), 0);
}

/// Test: generation streams the answer and attaches the review.
#[tokio::test]
async fn test_generate_after_prepare() {
    let completion = happy_completion("unused").script(
        CallPurpose::AnswerCritique,
        &[r#"{"needs_fix": true, "reason": "no deadline", "fix_suggestion": "add it"}"#],
    );
    let h = pipeline_harness(completion, happy_records(), happy_search());
    let cancel = CancellationToken::new();
    h.pipeline
        .prepare(&key(), LEGAL_QUERY, &keywords(LEGAL_QUERY), &cancel)
        .await
        .unwrap();

    let answer = h
        .pipeline
        .generate(&key(), LEGAL_QUERY, "(none)", &cancel)
        .await
        .unwrap();
    assert_eq!(answer.response, DEEP_ANSWER);
    assert!(answer.review.needs_fix);
    assert_eq!(answer.review.fix_suggestion, "add it");
    assert_eq!(h.completion.count(CallPurpose::AnswerCritique), 1);
}

/// Test: a malformed answer critique means no fix is flagged.
#[tokio::test]
async fn test_malformed_answer_critique_is_no_fix() {
    let completion =
        happy_completion("unused").script(CallPurpose::AnswerCritique, &["looks good"]);
    let h = pipeline_harness(completion, happy_records(), happy_search());
    let cancel = CancellationToken::new();
    h.pipeline
        .prepare(&key(), LEGAL_QUERY, &keywords(LEGAL_QUERY), &cancel)
        .await
        .unwrap();
    let answer = h
        .pipeline
        .generate(&key(), LEGAL_QUERY, "(none)", &cancel)
        .await
        .unwrap();
    assert!(!answer.review.needs_fix);
    assert!(h.search.calls.load(Ordering::SeqCst) >= 2);
}
