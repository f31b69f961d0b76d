//! Per-adapter runtime counters.
//!
//! The only mutable state an adapter carries. Guarded by a `parking_lot`
//! mutex; updated from the request path, read by health checks and metrics.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Snapshot of an adapter's recent history.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Total upstream calls attempted.
    pub calls: u64,
    /// Total calls that ended in a classified error.
    pub errors: u64,
    /// Errors since the last success.
    pub consecutive_errors: u64,
    /// When the last error happened.
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Mutable adapter counters.
#[derive(Debug, Default)]
pub struct AdapterStats {
    inner: Mutex<StatsSnapshot>,
}

impl AdapterStats {
    /// Fresh zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempted call.
    pub fn record_call(&self) {
        self.inner.lock().calls += 1;
    }

    /// Record a successful completion.
    pub fn record_success(&self) {
        self.inner.lock().consecutive_errors = 0;
    }

    /// Record a classified failure.
    pub fn record_error(&self) {
        let mut stats = self.inner.lock();
        stats.errors += 1;
        stats.consecutive_errors += 1;
        stats.last_error_at = Some(Utc::now());
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
