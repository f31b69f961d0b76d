//! Retry configuration and backoff calculation.
//!
//! Sync-only building blocks; the async retry loop lives in the engine's
//! branch executor. Retries are bounded two ways: an attempt count and a
//! total-sleep budget derived from the branch wall budget.

use serde::{Deserialize, Serialize};

/// Default maximum retries per upstream call.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default maximum delay between attempts in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;
/// Fraction of the branch wall budget that retry sleeps may consume.
pub const RETRY_BUDGET_FRACTION: f64 = 0.3;

/// Configuration for the per-call retry loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff in ms (default: 500).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay between retries in ms (default: 10000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0 (default: 0.2).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

/// Total retry sleep allowed for a branch given its wall budget.
#[must_use]
pub fn retry_sleep_budget_ms(branch_wall_ms: u64) -> u64 {
    (branch_wall_ms as f64 * RETRY_BUDGET_FRACTION) as u64
}

/// Calculate exponential backoff delay with jitter.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 + (random*2-1) * jitter)`
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG; 0.5 yields the
/// unjittered delay, making the function testable with fixed inputs.
#[must_use]
pub fn backoff_delay_ms(
    attempt: u32,
    config: &RetryConfig,
    random: f64,
) -> u64 {
    let exponential = config
        .base_delay_ms
        .saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(config.max_delay_ms);

    // Maps random [0,1) to [-jitter, +jitter]
    let jitter = 1.0 + (random * 2.0 - 1.0) * config.jitter_factor;
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

/// Parse a `Retry-After` HTTP header value.
///
/// The value can be either a number of seconds or an HTTP-date. Returns the
/// delay in milliseconds, or `None` if parsing fails.
#[must_use]
pub fn parse_retry_after_header(value: &str) -> Option<u64> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds * 1000);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
        let delay_ms = date
            .signed_duration_since(chrono::Utc::now())
            .num_milliseconds();
        return Some(delay_ms.max(0) as u64);
    }

    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
