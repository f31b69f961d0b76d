//! End-to-end pipeline scenarios over scripted providers.

mod common;

use std::time::Duration;

use common::{
    Behavior, ScriptedAdapter, collecting_sink, count_events, harness, harness_ok, payload,
    tokens_for,
};
use quorum_core::branch::BranchStatus;
use quorum_core::errors::ErrorKind;
use quorum_core::events::ExecuteEvent;
use quorum_core::route::Strategy;
use tokio_util::sync::CancellationToken;

const ARCHITECTURE_PROMPT: &str = "Design a distributed microservices architecture \
     for a multi-tenant payments gateway with strong consistency";

const PARALLEL_PROMPT: &str = "implement a concurrency limiter middleware for the \
     gateway request path, tuned for performance under burst load";

// ─────────────────────────────────────────────────────────────────────────────
// S1 — single-word routing
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn s1_single_word_routes_single_strategy() {
    let h = harness_ok();
    let (collector, sink) = collecting_sink();

    let result = h
        .pipeline
        .execute(
            payload(r#"{"task_kind":"code_generation","prompt":"build"}"#),
            sink,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::Single);
    assert_eq!(result.branches.len(), 1);
    assert_eq!(result.branches[0].status, BranchStatus::Succeeded);
    assert!(!result.output.is_empty());

    // The persona overlay reached the provider.
    let calls = h.anthropic.call_log();
    assert_eq!(calls.len(), 1);
    assert!(
        calls[0]
            .system_prompt
            .as_deref()
            .unwrap()
            .contains("senior software developer")
    );

    // Exactly one terminal event.
    let events = collector.events();
    assert_eq!(count_events(&events, "result"), 1);
    assert_eq!(count_events(&events, "error"), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// S2 — complex architecture goes quantum
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn s2_complex_architecture_goes_quantum() {
    let h = harness(
        ScriptedAdapter::new("anthropic", Behavior::ok("plain text plan"))
            .on_model("claude-sonnet-4-5", Behavior::ok("```rust\n// winning design\n```")),
        ScriptedAdapter::new("openai", Behavior::ok("another plain plan")),
    );
    let (_collector, sink) = collecting_sink();

    let result = h
        .pipeline
        .execute(
            payload(&format!(
                r#"{{"task_kind":"code_generation","prompt":"{ARCHITECTURE_PROMPT}"}}"#
            )),
            sink,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::Quantum);
    assert!(result.branches.len() >= 3 && result.branches.len() <= 5);

    // Diversified: no duplicate (provider, model) pair.
    for (i, a) in result.branches.iter().enumerate() {
        for b in &result.branches[i + 1..] {
            assert!(
                a.candidate.provider_id != b.candidate.provider_id
                    || a.candidate.model_id != b.candidate.model_id
                    || a.candidate.params.differs_materially(&b.candidate.params)
            );
        }
    }

    // The fenced output out-scores the plain ones.
    assert!(result.output.contains("winning design"));
    let winner = result
        .branches
        .iter()
        .find(|b| b.branch_id == result.chosen_branch_id)
        .unwrap();
    assert_eq!(winner.candidate.model_id, "claude-sonnet-4-5");
}

// ─────────────────────────────────────────────────────────────────────────────
// S3 — first-success race
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn s3_first_success_wins_and_cancels_losers() {
    let h = harness(
        ScriptedAdapter::new("anthropic", Behavior::ok("unused"))
            .on_model("claude-opus-4-6", Behavior::ok_after(2000, "slow output"))
            .on_model("claude-sonnet-4-5", Behavior::ok_after(50, "fast output")),
        ScriptedAdapter::new("openai", Behavior::ok("unused")),
    );
    let (_collector, sink) = collecting_sink();

    let result = h
        .pipeline
        .execute(
            payload(&format!(
                r#"{{"task_kind":"code_generation","prompt":"{PARALLEL_PROMPT}",
                    "constraints":{{"max_latency_ms":5000,"max_cost_usd":null,"max_tokens":null,"stream":false}}}}"#
            )),
            sink,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::Parallel);
    assert_eq!(result.output, "fast output");

    let winner = result
        .branches
        .iter()
        .find(|b| b.branch_id == result.chosen_branch_id)
        .unwrap();
    assert_eq!(winner.status, BranchStatus::Succeeded);
    assert_eq!(winner.candidate.model_id, "claude-sonnet-4-5");

    for branch in &result.branches {
        if branch.branch_id != result.chosen_branch_id {
            assert_eq!(branch.status, BranchStatus::Cancelled);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// S4 — all branches fail with mixed kinds
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn s4_all_fail_reports_highest_priority_kind() {
    let h = harness(
        ScriptedAdapter::new("anthropic", Behavior::ok("unused"))
            .on_model("claude-opus-4-6", Behavior::fail(ErrorKind::Provider5xx))
            .on_model("claude-sonnet-4-5", Behavior::fail(ErrorKind::RateLimit)),
        ScriptedAdapter::new("openai", Behavior::fail(ErrorKind::Network)),
    );
    let (collector, sink) = collecting_sink();

    let err = h
        .pipeline
        .execute(
            payload(&format!(
                r#"{{"task_kind":"code_generation","prompt":"{ARCHITECTURE_PROMPT}"}}"#
            )),
            sink,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provider5xx);
    assert!(err.is_retryable());

    let events = collector.events();
    assert_eq!(count_events(&events, "result"), 0);
    let terminal = events.last().unwrap();
    match terminal {
        ExecuteEvent::Error {
            kind, retryable, ..
        } => {
            assert_eq!(*kind, ErrorKind::Provider5xx);
            assert!(*retryable);
        }
        other => panic!("expected terminal error event, got {other:?}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// S5 — caller cancellation mid-run
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn s5_caller_cancellation_settles_every_branch() {
    let h = harness(
        ScriptedAdapter::new("anthropic", Behavior::Hang),
        ScriptedAdapter::new("openai", Behavior::Hang),
    );
    let (collector, sink) = collecting_sink();
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    let _cancel_task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let err = h
        .pipeline
        .execute(
            payload(&format!(
                r#"{{"task_kind":"code_generation","prompt":"{ARCHITECTURE_PROMPT}",
                    "constraints":{{"max_latency_ms":null,"max_cost_usd":null,"max_tokens":null,"stream":true}}}}"#
            )),
            sink,
            cancel,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);

    let events = collector.events();
    // Terminal error is the last event; nothing follows it.
    let last = events.last().unwrap();
    assert_eq!(last.event_type(), "error");

    // Every announced branch reached a terminal state.
    let announced: Vec<String> = events
        .iter()
        .find_map(|e| match e {
            ExecuteEvent::Meta { branches, .. } => Some(
                branches
                    .iter()
                    .map(|b| b.branch_id.as_str().to_string())
                    .collect(),
            ),
            _ => None,
        })
        .unwrap();
    assert_eq!(announced.len(), 3);
    for id in &announced {
        let terminal = events.iter().any(|e| {
            matches!(
                e,
                ExecuteEvent::BranchStatus { branch_id, status, .. }
                    if branch_id.as_str() == id && status.is_terminal()
            )
        });
        assert!(terminal, "branch {id} never reached a terminal state");
    }

    // No token events at all once cancelled (branches were hung).
    assert_eq!(count_events(&events, "token"), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// S6 — legacy model alias auto-corrects
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn s6_legacy_alias_auto_corrects() {
    let h = harness_ok();
    let (collector, sink) = collecting_sink();

    let result = h
        .pipeline
        .execute(
            payload(
                r#"{"task_kind":"code_generation","prompt":"build",
                    "preferred_providers":["openai"],"preferred_models":["gpt-4o"]}"#,
            ),
            sink,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.branches[0].candidate.model_id, "gpt-5.2");
    assert_eq!(result.branches[0].status, BranchStatus::Succeeded);

    let events = collector.events();
    assert_eq!(count_events(&events, "error"), 0);
    // The announcement already carries the canonical id.
    let meta_model = events
        .iter()
        .find_map(|e| match e {
            ExecuteEvent::Meta { branches, .. } => {
                Some(branches[0].candidate.model_id.clone())
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(meta_model, "gpt-5.2");
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming invariants
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn streamed_single_run_is_monotonic() {
    let h = harness(
        ScriptedAdapter::new("anthropic", Behavior::chunks(&["fn ", "main", "() {}"])),
        ScriptedAdapter::new("openai", Behavior::ok("unused")),
    );
    let (collector, sink) = collecting_sink();

    let result = h
        .pipeline
        .execute(
            payload(
                r#"{"task_kind":"code_generation","prompt":"build",
                    "constraints":{"max_latency_ms":null,"max_cost_usd":null,"max_tokens":null,"stream":true}}"#,
            ),
            sink,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.output, "fn main() {}");
    let events = collector.events();
    let streamed = tokens_for(&events, result.chosen_branch_id.as_str());
    assert_eq!(streamed, "fn main() {}");
}

#[tokio::test(start_paused = true)]
async fn streamed_race_supersedes_slow_leader() {
    let h = harness(
        ScriptedAdapter::new("anthropic", Behavior::ok("unused"))
            .on_model(
                "claude-opus-4-6",
                Behavior::Succeed {
                    delay_ms: 3000,
                    chunks: vec!["leader ".into(), "output".into()],
                    finish_reason: "end_turn".into(),
                },
            )
            .on_model("claude-sonnet-4-5", Behavior::ok_after(50, "challenger output")),
        ScriptedAdapter::new("openai", Behavior::ok("unused")),
    );
    let (collector, sink) = collecting_sink();

    let result = h
        .pipeline
        .execute(
            payload(&format!(
                r#"{{"task_kind":"code_generation","prompt":"{PARALLEL_PROMPT}",
                    "constraints":{{"max_latency_ms":5000,"max_cost_usd":null,"max_tokens":null,"stream":true}}}}"#
            )),
            sink,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.output, "challenger output");

    let events = collector.events();
    let superseded = events.iter().find_map(|e| match e {
        ExecuteEvent::Superseded {
            previous_branch_id,
            new_branch_id,
        } => Some((previous_branch_id.clone(), new_branch_id.clone())),
        _ => None,
    });
    let (_, new_id) = superseded.expect("expected a superseded event");
    assert_eq!(new_id, result.chosen_branch_id);

    // The winner's full output was flushed after the switch.
    let flushed = tokens_for(&events, result.chosen_branch_id.as_str());
    assert_eq!(flushed, "challenger output");
}

// ─────────────────────────────────────────────────────────────────────────────
// Sequential and hybrid strategies
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn sequential_stage_feeds_next_stage() {
    let h = harness(
        ScriptedAdapter::new("anthropic", Behavior::ok("unused"))
            .on_model("claude-opus-4-6", Behavior::ok("stage-one analysis"))
            .on_model("claude-sonnet-4-5", Behavior::ok("final synthesis")),
        ScriptedAdapter::new("openai", Behavior::ok("unused")),
    );
    let (_collector, sink) = collecting_sink();

    // Moderate complexity, analysis context → sequential.
    let prompt = "first analyze the concurrency behavior of this module, \
                  then explain how the session cache invalidates entries";
    let result = h
        .pipeline
        .execute(
            payload(&format!(
                r#"{{"task_kind":"code_analysis","prompt":"{prompt}"}}"#
            )),
            sink,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::Sequential);
    assert_eq!(result.output, "final synthesis");

    let calls = h.anthropic.call_log();
    assert_eq!(calls.len(), 2);
    assert!(
        calls[1].prompt.contains("stage-one analysis"),
        "stage two should see stage one's output"
    );
}

#[tokio::test(start_paused = true)]
async fn sequential_mandatory_stage_failure_aborts() {
    let h = harness(
        ScriptedAdapter::new("anthropic", Behavior::ok("unused"))
            .on_model("claude-opus-4-6", Behavior::fail(ErrorKind::Auth)),
        ScriptedAdapter::new("openai", Behavior::ok("unused")),
    );
    let (_collector, sink) = collecting_sink();

    let prompt = "first analyze the concurrency behavior of this module, \
                  then explain how the session cache invalidates entries";
    let err = h
        .pipeline
        .execute(
            payload(&format!(
                r#"{{"task_kind":"code_analysis","prompt":"{prompt}"}}"#
            )),
            sink,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Auth);
    // Stage two never ran.
    assert_eq!(h.anthropic.call_log().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn hybrid_refines_the_quantum_winner() {
    let h = harness(
        ScriptedAdapter::new("anthropic", Behavior::ok("core answer")),
        ScriptedAdapter::new("openai", Behavior::ok("core answer")),
    );
    let (_collector, sink) = collecting_sink();

    let result = h
        .pipeline
        .execute(
            payload(
                r#"{"task_kind":"code_generation",
                    "prompt":"production outage: the payments checkout flow fails"}"#,
            ),
            sink,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::Hybrid);
    // Core branches plus the refinement branch.
    assert_eq!(result.branches.len(), 4);

    // The refinement call saw the winner's output.
    let all_calls: Vec<_> = h
        .anthropic
        .call_log()
        .into_iter()
        .chain(h.openai.call_log())
        .collect();
    assert!(
        all_calls
            .iter()
            .any(|c| c.prompt.contains("Candidate answer:")),
        "refinement prompt should embed the winner output"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Budgets and retries
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn aggregate_cost_within_overprovisioned_budget() {
    let h = harness_ok();
    let (_collector, sink) = collecting_sink();

    let result = h
        .pipeline
        .execute(
            payload(&format!(
                r#"{{"task_kind":"code_generation","prompt":"{ARCHITECTURE_PROMPT}",
                    "constraints":{{"max_latency_ms":null,"max_cost_usd":0.5,"max_tokens":null,"stream":false}}}}"#
            )),
            sink,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(result.aggregate.cost_usd <= 0.5 * 1.5);
    assert!(result.aggregate.tokens_in > 0);
}

#[tokio::test(start_paused = true)]
async fn wall_budget_times_out_hung_branches() {
    let h = harness(
        ScriptedAdapter::new("anthropic", Behavior::Hang),
        ScriptedAdapter::new("openai", Behavior::Hang),
    );
    let (_collector, sink) = collecting_sink();

    let err = h
        .pipeline
        .execute(
            payload(
                r#"{"task_kind":"code_generation","prompt":"build",
                    "constraints":{"max_latency_ms":1000,"max_cost_usd":null,"max_tokens":null,"stream":false}}"#,
            ),
            sink,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test(start_paused = true)]
async fn nonretryable_failure_is_not_retried() {
    let h = harness(
        ScriptedAdapter::new("anthropic", Behavior::fail(ErrorKind::Auth)),
        ScriptedAdapter::new("openai", Behavior::ok("unused")),
    );
    let (_collector, sink) = collecting_sink();

    let err = h
        .pipeline
        .execute(
            payload(r#"{"task_kind":"code_generation","prompt":"build"}"#),
            sink,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(h.anthropic.call_log().len(), 1, "AUTH must not be retried");
}

#[tokio::test(start_paused = true)]
async fn retryable_failure_is_retried_to_exhaustion() {
    let h = harness(
        ScriptedAdapter::new("anthropic", Behavior::fail(ErrorKind::Provider5xx)),
        ScriptedAdapter::new("openai", Behavior::ok("unused")),
    );
    let (_collector, sink) = collecting_sink();

    let err = h
        .pipeline
        .execute(
            payload(r#"{"task_kind":"code_generation","prompt":"build"}"#),
            sink,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provider5xx);
    // Initial attempt plus three retries.
    assert_eq!(h.anthropic.call_log().len(), 4);
}
