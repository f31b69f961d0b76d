//! Streaming wire events.
//!
//! When a caller requests streaming, the response body is a sequence of
//! newline-delimited JSON events. Event order within one branch is the
//! production order of its tokens; no cross-branch ordering is implied.

use serde::{Deserialize, Serialize};

use crate::branch::{BranchStatus, OrchestrationResult};
use crate::errors::ErrorKind;
use crate::ids::{BranchId, RequestId};
use crate::route::{CandidateTuple, Strategy};

/// Candidate info announced in the `meta` event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BranchAnnouncement {
    /// Branch identity.
    pub branch_id: BranchId,
    /// The tuple the branch will run.
    pub candidate: CandidateTuple,
}

/// One event on the streaming surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecuteEvent {
    /// First event of every stream: identity and plan.
    Meta {
        /// Request identity.
        request_id: RequestId,
        /// Strategy that will run.
        strategy: Strategy,
        /// Branches about to start, in candidate order.
        branches: Vec<BranchAnnouncement>,
    },

    /// Incremental output. Monotonic append per branch.
    Token {
        /// Producing branch.
        branch_id: BranchId,
        /// Text fragment.
        text: String,
    },

    /// The tentatively-streamed branch lost; its prefix is superseded.
    Superseded {
        /// Branch whose streamed prefix no longer stands.
        previous_branch_id: BranchId,
        /// Branch now being streamed (or already complete).
        new_branch_id: BranchId,
    },

    /// A branch reached a new lifecycle state.
    BranchStatus {
        /// The branch.
        branch_id: BranchId,
        /// New status.
        status: BranchStatus,
        /// Classification for failed branches.
        #[serde(skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
    },

    /// Terminal success event.
    Result {
        /// The final orchestration result.
        #[serde(flatten)]
        result: OrchestrationResult,
    },

    /// Terminal failure event. The stream closes after this.
    Error {
        /// Classification.
        kind: ErrorKind,
        /// Human-readable message.
        message: String,
        /// Contractual retryable flag.
        retryable: bool,
    },
}

impl ExecuteEvent {
    /// Event discriminant for logging and metrics.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Meta { .. } => "meta",
            Self::Token { .. } => "token",
            Self::Superseded { .. } => "superseded",
            Self::BranchStatus { .. } => "branch_status",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
        }
    }

    /// Whether the stream ends after this event.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. } | Self::Error { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
