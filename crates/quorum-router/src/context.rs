//! Primary-context detection.
//!
//! Scores keyword groups over the prompt and picks the dominant context.
//! Equal scores favor `architecture`, then `security`, over generation —
//! misrouting a design or security request costs more than misrouting a
//! plain generation request.

use quorum_core::request::{NormalizedRequest, TaskKind};
use quorum_core::route::PrimaryContext;

use crate::keywords::{CONTEXT_KEYWORDS, count_hits, normalize};

/// Tie-break precedence. Lower index wins at equal score.
const PRECEDENCE: [PrimaryContext; 5] = [
    PrimaryContext::Architecture,
    PrimaryContext::Security,
    PrimaryContext::CodeAnalysis,
    PrimaryContext::Testing,
    PrimaryContext::CodeGeneration,
];

/// Detect the primary context of a request.
///
/// Falls back to the declared task kind when no keyword group scores.
#[must_use]
pub fn detect(request: &NormalizedRequest) -> PrimaryContext {
    let normalized = normalize(&request.request.prompt);

    let mut best: Option<(PrimaryContext, u32)> = None;
    for context in PRECEDENCE {
        let set = CONTEXT_KEYWORDS
            .iter()
            .find(|(c, _)| *c == context)
            .map(|(_, set)| *set)
            .unwrap_or(&[]);
        let hits = count_hits(&normalized, set);
        if hits > 0 && best.is_none_or(|(_, b)| hits > b) {
            best = Some((context, hits));
        }
    }

    best.map_or_else(|| fallback(request.request.task_kind), |(ctx, _)| ctx)
}

/// Context implied by the task kind when the prompt says nothing.
fn fallback(task_kind: TaskKind) -> PrimaryContext {
    match task_kind {
        TaskKind::CodeGeneration => PrimaryContext::CodeGeneration,
        TaskKind::CodeAnalysis => PrimaryContext::CodeAnalysis,
        TaskKind::Testing => PrimaryContext::Testing,
        TaskKind::Custom => PrimaryContext::Other,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
