//! Complexity scoring.
//!
//! A weighted, deterministic function from the normalized request to one of
//! five buckets. The same input always lands in the same bucket; thresholds
//! are fixed constants, not tuned at runtime.

use std::sync::LazyLock;

use quorum_core::request::NormalizedRequest;
use quorum_core::route::Complexity;
use regex::Regex;
use tracing::debug;

use crate::keywords::{
    COMPLEXITY_KEYWORDS, CRITICALITY_BOOSTS, SIMPLICITY_CAPS, count_hits, normalize,
};

/// Multi-step phrasing: "first … then", "step 1", numbered lists.
static MULTI_STEP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bfirst\b.*\bthen\b|\bstep\s*\d|\n\s*\d+[.)]\s").expect("valid regex")
});

/// Points per complexity keyword hit.
const KEYWORD_WEIGHT: u32 = 2;
/// Points when multi-step phrasing is present.
const MULTI_STEP_WEIGHT: u32 = 2;

/// Score a request and place it in a bucket.
#[must_use]
pub fn score(request: &NormalizedRequest) -> Complexity {
    let prompt = &request.request.prompt;
    let normalized = normalize(prompt);

    let mut points = length_points(prompt);
    points += count_hits(&normalized, COMPLEXITY_KEYWORDS) * KEYWORD_WEIGHT;
    if MULTI_STEP.is_match(prompt) {
        points += MULTI_STEP_WEIGHT;
    }
    points += file_points(request);

    let mut bucket = bucket_for(points);

    // Explicit keywords override the score in both directions.
    if count_hits(&normalized, CRITICALITY_BOOSTS) > 0 {
        bucket = Complexity::Critical;
    } else if count_hits(&normalized, SIMPLICITY_CAPS) > 0 {
        bucket = bucket.min(Complexity::Simple);
    }

    debug!(points, bucket = ?bucket, "complexity scored");
    bucket
}

/// Prompt-length buckets.
fn length_points(prompt: &str) -> u32 {
    match prompt.chars().count() {
        0..50 => 0,
        50..200 => 1,
        200..500 => 2,
        500..1000 => 3,
        _ => 4,
    }
}

/// Attachment contribution: count plus total size.
fn file_points(request: &NormalizedRequest) -> u32 {
    let count = (request.request.files.len() as u32).min(3);
    let bytes = request.request.total_file_bytes();
    let size = match bytes {
        0..10_000 => 0,
        10_000..100_000 => 1,
        _ => 2,
    };
    count + size
}

/// Fixed thresholds from points to bucket.
fn bucket_for(points: u32) -> Complexity {
    match points {
        0..=1 => Complexity::Trivial,
        2..=3 => Complexity::Simple,
        4..=6 => Complexity::Moderate,
        7..=9 => Complexity::Complex,
        _ => Complexity::Critical,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
