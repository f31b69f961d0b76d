//! Token estimation.
//!
//! Upstream usage reports are authoritative; this estimator exists for
//! pre-flight cost prediction, context-window truncation, and accounting
//! when a provider omits usage on a streamed response. The heuristic is the
//! usual ~4 characters per token; the model ID parameter keeps the call
//! signature provider-shaped for when a family needs its own ratio.

/// Estimate the token count of `text` under `model_id`.
///
/// Deterministic. Stays within a few percent of real tokenizers on typical
/// English-plus-code input, which is all the engine needs.
#[must_use]
pub fn estimate_tokens(text: &str, model_id: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let _ = model_id;
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
