//! Error taxonomy for the engine.
//!
//! [`ErrorKind`] is a closed set: every failure, internal or upstream, maps
//! to exactly one kind at the boundary. The `retryable` flag per kind is
//! contractual — retry policy and the HTTP surface both depend on it.

use serde::{Deserialize, Serialize};

/// Closed set of failure classifications.
///
/// Wire representation is `SCREAMING_SNAKE_CASE` (`"RATE_LIMIT"`, …).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Invalid or missing credentials.
    Auth,
    /// Upstream rate limit hit.
    RateLimit,
    /// Prompt exceeds the model's context window.
    ContextOverflow,
    /// Upstream refused the request on safety grounds.
    SafetyRefusal,
    /// Upstream 5xx server error.
    #[serde(rename = "PROVIDER_5XX")]
    Provider5xx,
    /// Wall-clock budget exceeded.
    Timeout,
    /// Transport-level failure (DNS, connect, reset).
    Network,
    /// Cooperatively cancelled.
    Cancelled,
    /// `(provider, model)` not resolvable in the registry.
    InvalidModel,
    /// Request rejected at intake (schema violation).
    BadRequest,
    /// Anything that escaped classification.
    Unknown,
}

impl ErrorKind {
    /// Whether the engine may retry a failure of this kind.
    ///
    /// Retryable kinds are still bounded by the per-branch retry budget.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Provider5xx | Self::Timeout | Self::Network
        )
    }

    /// Priority used when collapsing an all-branches-failed set to a single
    /// reported kind. Higher wins.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::SafetyRefusal => 10,
            Self::ContextOverflow => 9,
            Self::Auth => 8,
            Self::InvalidModel => 7,
            Self::Provider5xx => 6,
            Self::RateLimit => 5,
            Self::Timeout => 4,
            Self::Network => 3,
            Self::BadRequest => 2,
            Self::Cancelled => 1,
            Self::Unknown => 0,
        }
    }

    /// Whether the failure originated upstream (provider side) rather than
    /// inside the engine. Drives the 502-vs-500 HTTP split.
    #[must_use]
    pub fn is_upstream(self) -> bool {
        matches!(
            self,
            Self::RateLimit
                | Self::Provider5xx
                | Self::Network
                | Self::SafetyRefusal
                | Self::ContextOverflow
        )
    }

    /// Stable wire string (matches the serde representation).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "AUTH",
            Self::RateLimit => "RATE_LIMIT",
            Self::ContextOverflow => "CONTEXT_OVERFLOW",
            Self::SafetyRefusal => "SAFETY_REFUSAL",
            Self::Provider5xx => "PROVIDER_5XX",
            Self::Timeout => "TIMEOUT",
            Self::Network => "NETWORK",
            Self::Cancelled => "CANCELLED",
            Self::InvalidModel => "INVALID_MODEL",
            Self::BadRequest => "BAD_REQUEST",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// All members, in priority order (highest first). Used by tests and by
    /// the all-failed collapse.
    #[must_use]
    pub fn all() -> [Self; 11] {
        [
            Self::SafetyRefusal,
            Self::ContextOverflow,
            Self::Auth,
            Self::InvalidModel,
            Self::Provider5xx,
            Self::RateLimit,
            Self::Timeout,
            Self::Network,
            Self::BadRequest,
            Self::Cancelled,
            Self::Unknown,
        ]
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-level error carried across stage boundaries.
///
/// Branch-internal failures never surface as this type — they are recorded
/// on the [`crate::branch::BranchExecution`] instead. `EngineError` is what
/// the pipeline reports when the request as a whole fails.
#[derive(Clone, Debug, thiserror::Error)]
pub enum EngineError {
    /// Schema violation or semantic intake failure.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A requested `(provider, model)` could not be resolved.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// The router could not produce a usable candidate set.
    #[error("routing failed: {0}")]
    Routing(String),

    /// Every branch failed; carries the highest-priority branch error.
    #[error("all branches failed: {message}")]
    AllBranchesFailed {
        /// Highest-priority kind among the failed branches.
        kind: ErrorKind,
        /// Human-readable detail from the winning error.
        message: String,
    },

    /// The caller cancelled the request.
    #[error("request cancelled by caller")]
    Cancelled,

    /// Request-level wall budget exceeded.
    #[error("request timed out after {wall_ms}ms")]
    Timeout {
        /// Elapsed wall time when the deadline fired.
        wall_ms: u64,
    },

    /// Engine-internal failure that escaped classification.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Map to the closed taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::InvalidModel(_) | Self::Routing(_) => ErrorKind::InvalidModel,
            Self::AllBranchesFailed { kind, .. } => *kind,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Internal(_) => ErrorKind::Unknown,
        }
    }

    /// Contractual retryable flag for the error envelope.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
