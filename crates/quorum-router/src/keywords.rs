//! Keyword tables shared by persona validation, complexity scoring, and
//! context detection.
//!
//! Matching is case-insensitive whole-word containment over a normalized
//! prompt. Tables are static so every consumer sees the same vocabulary.

use quorum_core::request::Persona;
use quorum_core::route::PrimaryContext;

/// Keywords voting for each persona.
pub const PERSONA_KEYWORDS: &[(Persona, &[&str])] = &[
    (
        Persona::Developer,
        &[
            "build", "implement", "create", "write", "code", "function", "fix", "debug", "add",
            "feature",
        ],
    ),
    (
        Persona::Reviewer,
        &[
            "review", "critique", "feedback", "improve", "refactor", "readability", "lint",
        ],
    ),
    (
        Persona::Architect,
        &[
            "design", "architecture", "architect", "system", "scalable", "microservices",
            "diagram", "structure",
        ],
    ),
    (
        Persona::Tester,
        &[
            "test", "tests", "testing", "coverage", "regression", "assert", "mock", "fixture",
        ],
    ),
    (
        Persona::Security,
        &[
            "security", "vulnerability", "exploit", "injection", "sanitize", "audit", "cve",
            "authentication",
        ],
    ),
    (
        Persona::Documenter,
        &[
            "document", "documentation", "docs", "readme", "comment", "explain", "describe",
        ],
    ),
];

/// Single-verb prompts that map straight to a persona.
pub const VERB_PERSONAS: &[(&str, Persona)] = &[
    ("build", Persona::Developer),
    ("test", Persona::Tester),
    ("review", Persona::Reviewer),
    ("debug", Persona::Developer),
    ("design", Persona::Architect),
    ("document", Persona::Documenter),
];

/// Keywords voting for each primary context.
pub const CONTEXT_KEYWORDS: &[(PrimaryContext, &[&str])] = &[
    (
        PrimaryContext::CodeGeneration,
        &["build", "implement", "create", "write", "generate", "add", "function"],
    ),
    (
        PrimaryContext::CodeAnalysis,
        &["analyze", "explain", "understand", "review", "read", "trace", "investigate"],
    ),
    (
        PrimaryContext::Architecture,
        &[
            "architecture", "design", "microservices", "distributed", "system", "scalable",
            "gateway", "infrastructure",
        ],
    ),
    (
        PrimaryContext::Security,
        &[
            "security", "vulnerability", "exploit", "injection", "audit", "encrypt",
            "authentication", "secrets",
        ],
    ),
    (
        PrimaryContext::Testing,
        &["test", "tests", "coverage", "regression", "unit", "integration", "e2e"],
    ),
];

/// Keywords that raise the complexity score.
pub const COMPLEXITY_KEYWORDS: &[&str] = &[
    "distributed",
    "concurrency",
    "concurrent",
    "refactor",
    "microservices",
    "security",
    "consensus",
    "scalable",
    "migration",
    "multi-tenant",
    "consistency",
    "performance",
];

/// Keywords that cap complexity at `Simple` regardless of score.
pub const SIMPLICITY_CAPS: &[&str] = &["trivial", "one-liner", "quick fix", "tiny"];

/// Keywords that force complexity to `Critical`.
pub const CRITICALITY_BOOSTS: &[&str] = &["mission-critical", "production outage", "critical path"];

/// Normalize a prompt for matching: lowercase, collapse whitespace.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Whole-word containment check over a normalized haystack.
///
/// Multi-word needles match as substrings; single words must be bounded by
/// non-alphanumeric characters so "testing" doesn't count as "test"… it
/// counts for "testing" instead.
#[must_use]
pub fn contains_word(normalized: &str, needle: &str) -> bool {
    if needle.contains(' ') || needle.contains('-') {
        return normalized.contains(needle);
    }
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == needle)
}

/// Count how many needles from `set` appear in the normalized text.
#[must_use]
pub fn count_hits(normalized: &str, set: &[&str]) -> u32 {
    set.iter()
        .filter(|needle| contains_word(normalized, needle))
        .count() as u32
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
