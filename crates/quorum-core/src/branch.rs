//! Branch execution records and the orchestration result.
//!
//! A [`BranchExecution`] is the single source of truth for one speculative
//! attempt. Failures never cross the branch boundary as errors — they are
//! recorded as `(status, error_kind)` here. Terminal states are absorbing:
//! transition methods on a terminal record are no-ops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ErrorKind;
use crate::ids::{BranchId, RequestId};
use crate::route::{CandidateTuple, Strategy};

/// Lifecycle state of one branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchStatus {
    /// Created, not yet started.
    Pending,
    /// Upstream call in flight.
    Running,
    /// Finished with a final output.
    Succeeded,
    /// Finished with a classified error.
    Failed,
    /// Cooperatively cancelled.
    Cancelled,
    /// Wall budget exceeded.
    TimedOut,
}

impl BranchStatus {
    /// Whether this status is terminal (absorbing).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }
}

impl std::fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// One speculative execution attempt.
#[derive(Clone, Debug)]
pub struct BranchExecution {
    /// Branch identity.
    pub branch_id: BranchId,
    /// The tuple this branch runs.
    pub candidate: CandidateTuple,
    /// Index of the candidate in the route decision (tie-break key).
    pub candidate_index: usize,
    /// Lifecycle state.
    pub status: BranchStatus,
    /// When the branch left `Pending`.
    pub started_at: Option<DateTime<Utc>>,
    /// When the branch reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Prompt tokens consumed (includes retries).
    pub tokens_in: u64,
    /// Completion tokens produced.
    pub tokens_out: u64,
    /// Dollars spent.
    pub cost_usd: f64,
    /// Append-only partial output accumulated from stream deltas.
    pub partial_output: String,
    /// Final output, present iff `Succeeded`.
    pub final_output: Option<String>,
    /// Upstream finish reason, present iff `Succeeded`.
    pub finish_reason: Option<String>,
    /// Error classification, present iff `Failed`/`TimedOut`/`Cancelled`.
    pub error_kind: Option<ErrorKind>,
    /// Human-readable error detail.
    pub error_message: Option<String>,
    /// Score assigned at collapse time (best-of-n only).
    pub score: Option<f64>,
}

impl BranchExecution {
    /// Create a pending branch for a candidate.
    #[must_use]
    pub fn pending(candidate: CandidateTuple, candidate_index: usize) -> Self {
        Self {
            branch_id: BranchId::generate(),
            candidate,
            candidate_index,
            status: BranchStatus::Pending,
            started_at: None,
            finished_at: None,
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: 0.0,
            partial_output: String::new(),
            final_output: None,
            finish_reason: None,
            error_kind: None,
            error_message: None,
            score: None,
        }
    }

    /// Transition `Pending → Running`. No-op from any other state.
    pub fn start(&mut self) {
        if self.status == BranchStatus::Pending {
            self.status = BranchStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    /// Append a streamed delta. Ignored once terminal.
    pub fn append_output(&mut self, delta: &str) {
        if !self.status.is_terminal() {
            self.partial_output.push_str(delta);
        }
    }

    /// Transition to `Succeeded`. No-op if already terminal.
    pub fn succeed(&mut self, final_output: String, finish_reason: String) {
        if self.status.is_terminal() {
            return;
        }
        self.status = BranchStatus::Succeeded;
        self.final_output = Some(final_output);
        self.finish_reason = Some(finish_reason);
        self.finished_at = Some(Utc::now());
    }

    /// Transition to `Failed` with a classified kind. No-op if terminal.
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = BranchStatus::Failed;
        self.error_kind = Some(kind);
        self.error_message = Some(message.into());
        self.finished_at = Some(Utc::now());
    }

    /// Transition to `Cancelled`. No-op if terminal.
    pub fn cancel(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = BranchStatus::Cancelled;
        self.error_kind = Some(ErrorKind::Cancelled);
        self.finished_at = Some(Utc::now());
    }

    /// Transition to `TimedOut`. No-op if terminal.
    pub fn time_out(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = BranchStatus::TimedOut;
        self.error_kind = Some(ErrorKind::Timeout);
        self.finished_at = Some(Utc::now());
    }

    /// Record token/cost accounting. Additive — retries accumulate.
    pub fn add_usage(&mut self, tokens_in: u64, tokens_out: u64, cost_usd: f64) {
        self.tokens_in += tokens_in;
        self.tokens_out += tokens_out;
        self.cost_usd += cost_usd;
    }

    /// Wall time between start and finish, if both are known.
    #[must_use]
    pub fn wall_ms(&self) -> Option<u64> {
        let (start, end) = (self.started_at?, self.finished_at?);
        let ms = end.signed_duration_since(start).num_milliseconds();
        Some(ms.max(0) as u64)
    }

    /// Wire summary for result envelopes.
    #[must_use]
    pub fn summary(&self) -> BranchSummary {
        BranchSummary {
            branch_id: self.branch_id.clone(),
            candidate: self.candidate.clone(),
            status: self.status,
            tokens_in: self.tokens_in,
            tokens_out: self.tokens_out,
            cost_usd: self.cost_usd,
            error_kind: self.error_kind,
        }
    }
}

/// Wire-facing branch summary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BranchSummary {
    /// Branch identity.
    pub branch_id: BranchId,
    /// The tuple this branch ran.
    pub candidate: CandidateTuple,
    /// Terminal status.
    pub status: BranchStatus,
    /// Prompt tokens consumed.
    pub tokens_in: u64,
    /// Completion tokens produced.
    pub tokens_out: u64,
    /// Dollars spent.
    pub cost_usd: f64,
    /// Error classification for non-succeeded branches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Accounting summed across every branch, winners and losers alike.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    /// Total prompt tokens.
    pub tokens_in: u64,
    /// Total completion tokens.
    pub tokens_out: u64,
    /// Total dollars.
    pub cost_usd: f64,
    /// Wall time of the whole orchestration.
    pub wall_ms: u64,
}

impl Aggregate {
    /// Fold a branch's accounting into the total.
    pub fn absorb(&mut self, branch: &BranchExecution) {
        self.tokens_in += branch.tokens_in;
        self.tokens_out += branch.tokens_out;
        self.cost_usd += branch.cost_usd;
    }
}

/// The exactly-once outcome of an orchestration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestrationResult {
    /// The request this result answers.
    pub request_id: RequestId,
    /// Winning branch.
    pub chosen_branch_id: BranchId,
    /// The winning output.
    pub output: String,
    /// Summed accounting.
    pub aggregate: Aggregate,
    /// Strategy that ran.
    pub strategy: Strategy,
    /// Summaries of every branch, in candidate order.
    pub branches: Vec<BranchSummary>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
