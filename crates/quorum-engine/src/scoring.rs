//! Best-of-n scoring.
//!
//! A pure, deterministic function over a terminal branch: the same branch
//! record always scores the same. Winner selection tie-breaks on lower
//! cost, then lower wall time, then lower candidate index.

use quorum_core::branch::{BranchExecution, BranchStatus};
use quorum_core::request::{Persona, TaskKind};

/// Weight of the finish-reason component.
pub const FINISH_WEIGHT: f64 = 0.40;
/// Weight of the output-structure component.
pub const STRUCTURE_WEIGHT: f64 = 0.30;
/// Weight of the inverse-cost bonus.
pub const COST_WEIGHT: f64 = 0.15;
/// Weight of the candidate's prior weight.
pub const PRIOR_WEIGHT: f64 = 0.15;

/// Score one succeeded branch in `[0, 1]`-ish range.
///
/// Non-succeeded branches score negative infinity so they can never win.
#[must_use]
pub fn score_branch(branch: &BranchExecution, task_kind: TaskKind, persona: Persona) -> f64 {
    if branch.status != BranchStatus::Succeeded {
        return f64::NEG_INFINITY;
    }
    let output = branch.final_output.as_deref().unwrap_or("");

    let finish = finish_component(branch.finish_reason.as_deref());
    let structure = structure_component(output, task_kind, persona);
    let cost = 1.0 / (1.0 + branch.cost_usd * 10.0);
    let prior = (branch.candidate.weight / 2.0).clamp(0.0, 1.0);

    FINISH_WEIGHT * finish
        + STRUCTURE_WEIGHT * structure
        + COST_WEIGHT * cost
        + PRIOR_WEIGHT * prior
}

/// Natural completion beats truncation.
fn finish_component(reason: Option<&str>) -> f64 {
    match reason {
        Some("end_turn") => 1.0,
        Some("max_tokens") => 0.3,
        _ => 0.5,
    }
}

/// Output-shape heuristics appropriate to the task kind.
fn structure_component(output: &str, task_kind: TaskKind, persona: Persona) -> f64 {
    if output.trim().is_empty() {
        return 0.0;
    }
    let has_code_fence = output.contains("```");
    let has_test_markers = output.contains("#[test]")
        || output.contains("def test_")
        || output.contains("it(")
        || output.contains("assert");

    let mut component: f64 = match task_kind {
        TaskKind::CodeGeneration => {
            if has_code_fence {
                1.0
            } else {
                0.3
            }
        }
        TaskKind::Testing => match (has_code_fence, has_test_markers) {
            (true, true) => 1.0,
            (true, false) => 0.5,
            (false, true) => 0.4,
            (false, false) => 0.2,
        },
        // Prose tasks: substance over fences.
        TaskKind::CodeAnalysis | TaskKind::Custom => {
            if output.len() >= 200 {
                1.0
            } else {
                0.5
            }
        }
    };

    // A tester persona that produced no tests is off-task whatever the
    // declared task kind.
    if persona == Persona::Tester && !has_test_markers {
        component *= 0.5;
    }

    component.clamp(0.0, 1.0)
}

/// Pick the winning branch index among the given branches.
///
/// Highest score wins; ties break on lower cost, then lower wall time,
/// then lower candidate index. Returns `None` when no branch succeeded.
#[must_use]
pub fn pick_winner(
    branches: &[BranchExecution],
    task_kind: TaskKind,
    persona: Persona,
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, branch) in branches.iter().enumerate() {
        if branch.status != BranchStatus::Succeeded {
            continue;
        }
        let score = score_branch(branch, task_kind, persona);
        let better = match best {
            None => true,
            Some((best_idx, best_score)) => {
                score > best_score
                    || (approx_eq(score, best_score)
                        && tie_break(branch, &branches[best_idx]))
            }
        };
        if better {
            best = Some((idx, score));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Lower cost, then lower wall time, then lower candidate index.
fn tie_break(challenger: &BranchExecution, incumbent: &BranchExecution) -> bool {
    if !approx_eq(challenger.cost_usd, incumbent.cost_usd) {
        return challenger.cost_usd < incumbent.cost_usd;
    }
    let (cw, iw) = (
        challenger.wall_ms().unwrap_or(u64::MAX),
        incumbent.wall_ms().unwrap_or(u64::MAX),
    );
    if cw != iw {
        return cw < iw;
    }
    challenger.candidate_index < incumbent.candidate_index
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Normalize an output for consensus comparison: whitespace-insensitive,
/// case-insensitive equality over the trimmed body.
#[must_use]
pub fn normalize_output(output: &str) -> String {
    output
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
