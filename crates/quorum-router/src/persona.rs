//! Persona validation and prompt enhancement.
//!
//! Turns free-text input — sometimes a single word — into a known persona
//! plus an enhanced prompt. Enhancement prepends a fixed persona overlay;
//! re-validating an already-enhanced prompt is a no-op for the persona and
//! prompt fields, so enhancement never compounds.

use quorum_core::request::Persona;
use tracing::debug;

use crate::keywords::{
    CONTEXT_KEYWORDS, PERSONA_KEYWORDS, VERB_PERSONAS, count_hits, normalize,
};

/// Output of persona validation.
#[derive(Clone, Debug, PartialEq)]
pub struct PersonaResolution {
    /// Resolved persona. Always a known value.
    pub persona: Persona,
    /// Prompt with the persona overlay applied exactly once.
    pub enhanced_prompt: String,
    /// Confidence in `[0, 1]`. 0 means the default persona was forced.
    pub confidence: f64,
    /// Context tags detected from the prompt.
    pub tags: Vec<String>,
}

/// Fixed system overlay for each persona. Also the idempotence marker:
/// a prompt beginning with one of these has already been enhanced.
#[must_use]
pub fn overlay(persona: Persona) -> &'static str {
    match persona {
        Persona::Developer => {
            "You are a senior software developer. Write clear, working, idiomatic code."
        }
        Persona::Reviewer => {
            "You are a meticulous code reviewer. Identify defects, risks, and concrete improvements."
        }
        Persona::Architect => {
            "You are a systems architect. Reason about structure, trade-offs, and scale."
        }
        Persona::Tester => {
            "You are a test engineer. Exercise edge cases and make failures reproducible."
        }
        Persona::Security => {
            "You are a security engineer. Think adversarially and surface vulnerabilities."
        }
        Persona::Documenter => {
            "You are a technical writer. Explain the code precisely and completely."
        }
    }
}

const ALL_PERSONAS: [Persona; 6] = [
    Persona::Developer,
    Persona::Reviewer,
    Persona::Architect,
    Persona::Tester,
    Persona::Security,
    Persona::Documenter,
];

/// Validate a prompt into a persona and enhanced prompt.
///
/// Resolution order:
/// 1. already-enhanced prompt → returned unchanged
/// 2. explicit hint that parses → that persona
/// 3. single recognized verb → mapped persona
/// 4. keyword scoring → best persona, confidence from the score gap
/// 5. fallback → `developer` with confidence 0
#[must_use]
pub fn validate(prompt: &str, hint: Option<&str>) -> PersonaResolution {
    // Idempotence: an enhanced prompt starts with a known overlay.
    for persona in ALL_PERSONAS {
        if prompt.starts_with(overlay(persona)) {
            return PersonaResolution {
                persona,
                enhanced_prompt: prompt.to_string(),
                confidence: 1.0,
                tags: detect_tags(&normalize(prompt)),
            };
        }
    }

    let normalized = normalize(prompt);
    let tags = detect_tags(&normalized);

    if let Some(persona) = hint.and_then(Persona::parse) {
        debug!(persona = %persona, "persona resolved from hint");
        return resolution(persona, prompt, 1.0, tags);
    }

    if let Some(&(_, persona)) = VERB_PERSONAS.iter().find(|(verb, _)| *verb == normalized) {
        debug!(persona = %persona, verb = %normalized, "persona resolved from single verb");
        return resolution(persona, prompt, 1.0, tags);
    }

    let mut scores: Vec<(Persona, u32)> = PERSONA_KEYWORDS
        .iter()
        .map(|(persona, set)| (*persona, count_hits(&normalized, set)))
        .collect();
    // Stable: ties keep table order, which puts Developer first.
    scores.sort_by(|a, b| b.1.cmp(&a.1));

    let (top_persona, top) = scores[0];
    let second = scores[1].1;

    if top == 0 {
        debug!("no persona signal; defaulting to developer");
        return resolution(Persona::Developer, prompt, 0.0, tags);
    }

    let confidence = f64::from(top - second) / f64::from(top);
    debug!(persona = %top_persona, confidence, "persona resolved from keywords");
    resolution(top_persona, prompt, confidence, tags)
}

fn resolution(
    persona: Persona,
    prompt: &str,
    confidence: f64,
    tags: Vec<String>,
) -> PersonaResolution {
    PersonaResolution {
        persona,
        enhanced_prompt: format!("{}\n\n{}", overlay(persona), prompt),
        confidence,
        tags,
    }
}

/// Context tags with at least one keyword hit.
fn detect_tags(normalized: &str) -> Vec<String> {
    CONTEXT_KEYWORDS
        .iter()
        .filter(|(_, set)| count_hits(normalized, set) > 0)
        .map(|(ctx, _)| ctx.as_str().to_string())
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
