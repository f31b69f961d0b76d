//! The agent (branch) executor.
//!
//! Runs one candidate tuple to a terminal [`BranchExecution`]. Failures
//! never escape as errors: every outcome, including cancellation and wall
//! timeout, is recorded on the returned record. Cancellation is observed at
//! every suspension point; the wall budget is a scheduled cancellation that
//! lands as `TIMED_OUT`.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use parking_lot::Mutex;
use quorum_core::branch::BranchExecution;
use quorum_core::errors::ErrorKind;
use quorum_core::events::ExecuteEvent;
use quorum_core::ids::BranchId;
use quorum_core::request::NormalizedRequest;
use quorum_core::retry::{RetryConfig, backoff_delay_ms, retry_sleep_budget_ms};
use quorum_core::route::{Budget, CandidateTuple};
use quorum_providers::adapter::GenerateCall;
use quorum_providers::{ProviderError, ProviderRegistry};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::compose::compose;
use crate::sink::EventSink;

/// Whether a branch forwards token events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenDisposition {
    /// Emit `token` events as deltas arrive.
    Stream,
    /// Accumulate silently; output surfaces at collapse.
    Silent,
}

/// Everything a branch run needs. Owned so runs can be spawned as tasks.
pub struct BranchRun {
    /// The registry to resolve the candidate against.
    pub registry: Arc<ProviderRegistry>,
    /// The request being served.
    pub request: Arc<NormalizedRequest>,
    /// Pre-assigned branch identity (announced in `meta` before start).
    pub branch_id: BranchId,
    /// The candidate to execute.
    pub candidate: CandidateTuple,
    /// Index of the candidate in the route decision.
    pub candidate_index: usize,
    /// This branch's budget slice.
    pub budget: Budget,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Event sink for status (and optionally token) events.
    pub sink: Arc<dyn EventSink>,
    /// Whether to forward tokens.
    pub tokens: TokenDisposition,
    /// Cooperative cancellation.
    pub cancel: CancellationToken,
}

/// Run one branch to a terminal state.
#[instrument(skip_all, fields(
    provider = %run.candidate.provider_id,
    model = %run.candidate.model_id,
    index = run.candidate_index,
))]
pub async fn run_branch(run: BranchRun) -> BranchExecution {
    let mut branch = BranchExecution::pending(run.candidate.clone(), run.candidate_index);
    branch.branch_id = run.branch_id.clone();

    let (adapter, canonical) = match run
        .registry
        .resolve(&run.candidate.provider_id, &run.candidate.model_id)
    {
        Ok(resolved) => resolved,
        Err(err) => {
            branch.fail(err.kind(), err.to_string());
            emit_status(run.sink.as_ref(), &branch);
            return branch;
        }
    };
    branch.candidate.model_id = canonical.clone();

    let (context_window, _max_output) = match run
        .registry
        .manifest()
        .resolve(&run.candidate.provider_id, &canonical)
    {
        Ok(entry) => (entry.context_window, entry.max_output_tokens),
        Err(err) => {
            branch.fail(err.kind(), err.to_string());
            emit_status(run.sink.as_ref(), &branch);
            return branch;
        }
    };

    let composed = compose(&run.request, &branch.candidate, context_window);
    let call = GenerateCall {
        model_id: canonical,
        system_prompt: Some(composed.system_prompt.clone()),
        prompt: composed.user_prompt.clone(),
        temperature: branch.candidate.params.temperature,
        top_p: branch.candidate.params.top_p,
        max_output_tokens: branch
            .candidate
            .params
            .max_output_tokens
            .min(run.budget.tokens.max(1)),
    };

    // Pre-flight context check: no point burning an upstream call on a
    // prompt that cannot fit.
    let prompt_tokens = adapter.count_tokens(&call.prompt, &call.model_id)
        + call
            .system_prompt
            .as_deref()
            .map_or(0, |s| adapter.count_tokens(s, &call.model_id));
    if prompt_tokens + call.max_output_tokens > context_window {
        branch.fail(
            ErrorKind::ContextOverflow,
            format!(
                "prompt needs {prompt_tokens} tokens plus {} output against a {context_window} window",
                call.max_output_tokens
            ),
        );
        emit_status(run.sink.as_ref(), &branch);
        return branch;
    }

    // One upstream call at a time per provider.
    let permit = tokio::select! {
        () = run.cancel.cancelled() => {
            branch.cancel();
            emit_status(run.sink.as_ref(), &branch);
            return branch;
        }
        permit = run.registry.acquire(&run.candidate.provider_id) => match permit {
            Ok(p) => p,
            Err(err) => {
                branch.fail(err.kind(), err.to_string());
                emit_status(run.sink.as_ref(), &branch);
                return branch;
            }
        },
    };

    branch.start();
    emit_status(run.sink.as_ref(), &branch);

    // Accumulate deltas outside the adapter so partial output survives
    // cancellation and errors.
    let partial: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
    let outcome = tokio::time::timeout(
        Duration::from_millis(run.budget.wall_ms.max(1)),
        attempt_loop(&run, &branch, &call, Arc::clone(&partial), adapter.as_ref()),
    )
    .await;
    drop(permit);

    branch.partial_output = partial.lock().clone();

    match outcome {
        Ok(AttemptOutcome::Success(generation)) => {
            branch.add_usage(
                generation.tokens_in,
                generation.tokens_out,
                generation.cost_usd,
            );
            branch.succeed(generation.final_output, generation.finish_reason);
        }
        Ok(AttemptOutcome::Cancelled) => {
            account_partial(&mut branch, &call, adapter.as_ref());
            branch.cancel();
        }
        Ok(AttemptOutcome::Failed { kind, message }) => {
            account_partial(&mut branch, &call, adapter.as_ref());
            branch.fail(kind, message);
        }
        Err(_elapsed) => {
            account_partial(&mut branch, &call, adapter.as_ref());
            branch.time_out();
        }
    }

    counter!("branches_total", "status" => branch.status.to_string()).increment(1);
    if let Some(wall) = branch.wall_ms() {
        histogram!("branch_wall_ms").record(wall as f64);
    }
    emit_status(run.sink.as_ref(), &branch);
    branch
}

/// Terminal outcome of the retry loop.
enum AttemptOutcome {
    Success(quorum_providers::Generation),
    Cancelled,
    Failed { kind: ErrorKind, message: String },
}

/// Call the adapter with bounded retries.
///
/// Retryable failures back off exponentially (honoring `Retry-After`) as
/// long as both the attempt count and the retry sleep budget allow. An
/// attempt that already delivered deltas is final: a replay would break
/// token monotonicity.
async fn attempt_loop(
    run: &BranchRun,
    branch: &BranchExecution,
    call: &GenerateCall,
    partial: Arc<Mutex<String>>,
    adapter: &dyn quorum_providers::ProviderAdapter,
) -> AttemptOutcome {
    let sleep_budget_ms = retry_sleep_budget_ms(run.budget.wall_ms);
    let mut slept_ms: u64 = 0;
    let mut timeout_retried = false;

    for attempt in 0..=run.retry.max_retries {
        let len_before = partial.lock().len();
        let delta_sink = {
            let partial = Arc::clone(&partial);
            let sink = Arc::clone(&run.sink);
            let branch_id = branch.branch_id.clone();
            let stream = run.tokens == TokenDisposition::Stream;
            move |text: &str| {
                partial.lock().push_str(text);
                if stream {
                    sink.emit(ExecuteEvent::Token {
                        branch_id: branch_id.clone(),
                        text: text.to_string(),
                    });
                }
            }
        };

        let result = adapter.generate(call, &delta_sink, &run.cancel).await;

        let err = match result {
            Ok(generation) => return AttemptOutcome::Success(generation),
            Err(ProviderError::Cancelled) => return AttemptOutcome::Cancelled,
            Err(err) => err,
        };

        let streamed = partial.lock().len() > len_before;
        // TIMEOUT retries once per branch; other retryable kinds are
        // bounded by the attempt count.
        let timeout_exhausted = err.kind() == ErrorKind::Timeout && timeout_retried;
        if streamed || !err.is_retryable() || attempt == run.retry.max_retries || timeout_exhausted
        {
            return AttemptOutcome::Failed {
                kind: err.kind(),
                message: err.to_string(),
            };
        }
        if err.kind() == ErrorKind::Timeout {
            timeout_retried = true;
        }

        let jitter: f64 = rand::rng().random();
        let mut delay_ms = backoff_delay_ms(attempt, &run.retry, jitter);
        if let Some(after) = err.retry_after_ms() {
            delay_ms = delay_ms.max(after);
        }
        if slept_ms + delay_ms > sleep_budget_ms {
            debug!(
                slept_ms,
                delay_ms, sleep_budget_ms, "retry sleep budget exhausted"
            );
            return AttemptOutcome::Failed {
                kind: err.kind(),
                message: format!("{err} (retry budget exhausted)"),
            };
        }

        warn!(
            attempt,
            delay_ms,
            kind = %err.kind(),
            "retrying upstream call"
        );
        slept_ms += delay_ms;
        tokio::select! {
            () = run.cancel.cancelled() => return AttemptOutcome::Cancelled,
            () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
        }
    }

    // Unreachable: the final iteration always returns above.
    AttemptOutcome::Failed {
        kind: ErrorKind::Unknown,
        message: "retry loop exited unexpectedly".into(),
    }
}

/// Best-effort accounting for tokens consumed before a non-success end.
fn account_partial(
    branch: &mut BranchExecution,
    call: &GenerateCall,
    adapter: &dyn quorum_providers::ProviderAdapter,
) {
    let out = adapter.count_tokens(&branch.partial_output, &call.model_id);
    if out == 0 {
        return;
    }
    let tokens_in = adapter.count_tokens(&call.prompt, &call.model_id);
    let cost = adapter.cost_usd(&call.model_id, tokens_in, out);
    branch.add_usage(tokens_in, out, cost);
}

/// Emit a `branch_status` event for the current state.
fn emit_status(sink: &dyn EventSink, branch: &BranchExecution) {
    sink.emit(ExecuteEvent::BranchStatus {
        branch_id: branch.branch_id.clone(),
        status: branch.status,
        error_kind: branch.error_kind,
    });
}
