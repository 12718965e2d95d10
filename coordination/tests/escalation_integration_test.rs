//! Integration tests for the Escalation Engine
//!
//! Feeds raw triage outputs through sentinel parsing, advanced-request
//! detection and the engine, validating the full parse → decide → reset flow
//! over multi-turn conversations.

use counsel_coordination::escalation::engine::{EscalationEngine, EscalationReason};
use counsel_coordination::escalation::state::EscalationState;
use counsel_coordination::{
    AdvancedRequestDetector, EscalationConfig, QueryClass, Sentinel, SentinelError,
    SentinelMarkers, Verdict,
};

/// Build a verdict from a raw model output the way triage does.
fn verdict(raw: &str, query: &str) -> Result<Verdict, SentinelError> {
    let parsed = SentinelMarkers::default().parse(raw)?;
    Ok(Verdict {
        raw_text: raw.to_string(),
        cheap_response: parsed.body,
        sentinel: parsed.sentinel,
        query_class: QueryClass::InScope,
        force_advanced: AdvancedRequestDetector::default().wants_advanced(query),
        relevance: 0.5,
    })
}

/// Run a conversation and collect the escalate flag per turn.
fn converse(engine: &EscalationEngine, state: &mut EscalationState, turns: &[(&str, &str)]) -> Vec<bool> {
    turns
        .iter()
        .map(|(raw, query)| {
            let v = verdict(raw, query).unwrap();
            engine.decide(state, &v).escalate
        })
        .collect()
}

/// Test: Three affirm answers escalate on the third turn
#[test]
fn test_affirm_streak_escalates_on_threshold() {
    let engine = EscalationEngine::new();
    let mut state = EscalationState::new();

    let out = converse(
        &engine,
        &mut state,
        &[
            ("The deposit is due at lease end.\n###yes", "deposit return"),
            ("You may claim interest too. ###yes", "interest on deposit"),
            ("File a payment order.\n###YES.", "how to claim"),
        ],
    );

    assert_eq!(out, vec![false, false, true]);
    assert_eq!(state.yes_count, 3);
    assert!(state.escalated_once);
}

/// Test: A negative turn in the middle keeps the count but blocks escalation
#[test]
fn test_negative_turn_keeps_count_and_suppresses() {
    let engine = EscalationEngine::new();
    let mut state = EscalationState::new();

    converse(
        &engine,
        &mut state,
        &[("Rule applies. ###yes", "q1"), ("Rule applies. ###yes", "q2")],
    );
    let v = verdict("Tell me more about the contract. ###no", "q3").unwrap();
    let decision = engine.decide(&mut state, &v);

    assert!(!decision.escalate);
    assert_eq!(decision.reason, EscalationReason::Suppressed);
    assert_eq!(state.yes_count, 2);
    assert!(state.negative_flag);

    // The flag is recomputed on the next turn.
    let v = verdict("Here is the rule. ###yes", "q4").unwrap();
    let decision = engine.decide(&mut state, &v);
    assert!(decision.escalate);
    assert!(!state.negative_flag);
}

/// Test: An explicit advanced request escalates immediately
#[test]
fn test_advanced_phrase_forces_first_turn() {
    let engine = EscalationEngine::new();
    let mut state = EscalationState::new();

    let v = verdict("Short answer only.", "Please give me a DETAILED ANSWER on leases").unwrap();
    assert_eq!(v.sentinel, Sentinel::None);
    assert!(v.force_advanced);

    let decision = engine.decide(&mut state, &v);
    assert!(decision.escalate);
    assert_eq!(decision.reason, EscalationReason::ForcedAdvanced);
    assert_eq!(state.yes_count, 0);
}

/// Test: A forced request combined with a negative marker does not escalate
#[test]
fn test_negative_beats_forced_request() {
    let engine = EscalationEngine::new();
    let mut state = EscalationState::new();

    let v = verdict("Which city is the property in? ###no", "advanced answer please").unwrap();
    let decision = engine.decide(&mut state, &v);
    assert!(!decision.escalate);
    assert!(state.negative_flag);
}

/// Test: Reset after a delivered deep answer restarts the streak
#[test]
fn test_reset_restarts_streak() {
    let engine = EscalationEngine::with_config(EscalationConfig { affirm_threshold: 2 });
    let mut state = EscalationState::new();

    let out = converse(&engine, &mut state, &[("a ###yes", "q"), ("b ###yes", "q")]);
    assert_eq!(out, vec![false, true]);

    state.reset();
    assert!(state.is_initial());

    let out = converse(&engine, &mut state, &[("c ###yes", "q"), ("d ###yes", "q")]);
    assert_eq!(out, vec![false, true]);
}

/// Test: Turns without a marker leave the counter alone
#[test]
fn test_unmarked_turns_do_not_count() {
    let engine = EscalationEngine::new();
    let mut state = EscalationState::new();

    let out = converse(
        &engine,
        &mut state,
        &[
            ("### Summary\nThe lease ends in May.", "lease end"),
            ("No marker here", "lease end"),
        ],
    );
    assert_eq!(out, vec![false, false]);
    assert_eq!(state.yes_count, 0);
}

/// Test: A garbled marker is an error, not a silent default
#[test]
fn test_malformed_marker_is_rejected() {
    let err = verdict("Answer body.\n###maybe", "q").unwrap_err();
    assert!(matches!(err, SentinelError::Malformed { token } if token == "###maybe"));
}
