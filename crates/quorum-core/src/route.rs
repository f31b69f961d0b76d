//! Route plans — the full description of how a request will be executed.
//!
//! A [`RouteDecision`] is produced once per request by the router and is
//! read-only from then on. Everything the executors need — strategy,
//! candidates, collapse rule, stream mode, budgets — lives here.

use serde::{Deserialize, Serialize};

use crate::request::Persona;

/// Complexity bucket assigned by the router.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// One-liner territory.
    Trivial,
    /// Small, self-contained.
    Simple,
    /// Multi-part but routine.
    Moderate,
    /// Architectural or cross-cutting.
    Complex,
    /// High-stakes; gets a verifier.
    Critical,
}

/// Dominant context of the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryContext {
    /// Producing new code.
    CodeGeneration,
    /// Understanding existing code.
    CodeAnalysis,
    /// System design.
    Architecture,
    /// Security-sensitive work.
    Security,
    /// Test authoring.
    Testing,
    /// None of the above dominated.
    Other,
}

impl PrimaryContext {
    /// Stable wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CodeGeneration => "code_generation",
            Self::CodeAnalysis => "code_analysis",
            Self::Architecture => "architecture",
            Self::Security => "security",
            Self::Testing => "testing",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for PrimaryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution strategy chosen by the router.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One branch, top candidate.
    Single,
    /// Ordered pipeline; stage output feeds the next stage.
    Sequential,
    /// Race: first success wins.
    Parallel,
    /// Speculative fan-out with scored collapse.
    Quantum,
    /// Quantum core followed by a sequential refinement stage.
    Hybrid,
}

impl Strategy {
    /// Stable wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Quantum => "quantum",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How concurrent branches collapse to one winner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollapseRule {
    /// First branch to succeed wins; the rest are cancelled.
    FirstSuccess,
    /// Wait for all branches (up to the deadline), score, pick the max.
    BestOfN,
    /// Vote over comparable structured artifacts; falls back to `BestOfN`.
    WeightedVote,
    /// Majority output, then one refinement branch on the consensus.
    ConsensusThenRefine,
}

/// How tokens reach the caller while branches race.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// No incremental tokens; everything arrives with the result.
    Buffered,
    /// Stream the tentatively-leading branch, emit `superseded` on switch.
    TentativeLeader,
}

/// Role a branch plays within the orchestration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Produces the primary artifact.
    Generator,
    /// Reads and explains; first stage of sequential analysis.
    Analyzer,
    /// Combines prior stage output into the final artifact.
    Synthesizer,
    /// Checks the winning output; sequential verifier in hybrid runs.
    Verifier,
    /// Improves a consensus or winning output.
    Refiner,
}

impl AgentRole {
    /// Stable wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generator => "generator",
            Self::Analyzer => "analyzer",
            Self::Synthesizer => "synthesizer",
            Self::Verifier => "verifier",
            Self::Refiner => "refiner",
        }
    }
}

/// Sampling and prompt parameters for one candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling cutoff.
    #[serde(default)]
    pub top_p: Option<f64>,
    /// Output token ceiling for this branch.
    pub max_output_tokens: u64,
    /// Extra system-prompt overlay for this candidate (diversification).
    #[serde(default)]
    pub system_prompt_overlay: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            top_p: None,
            max_output_tokens: 4096,
            system_prompt_overlay: None,
        }
    }
}

impl GenerationParams {
    /// Whether two parameter sets differ enough that the same
    /// `(provider, model)` still counts as diversified.
    #[must_use]
    pub fn differs_materially(&self, other: &Self) -> bool {
        (self.temperature - other.temperature).abs() >= 0.2
            || self.system_prompt_overlay != other.system_prompt_overlay
    }
}

/// The `(agent role, provider, model, params)` combination a branch runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateTuple {
    /// Role within the orchestration.
    pub agent_role: AgentRole,
    /// Registry provider ID.
    pub provider_id: String,
    /// Canonical model ID (already validated against the registry).
    pub model_id: String,
    /// Sampling parameters.
    pub params: GenerationParams,
    /// Prior weight used in trimming and scoring. Higher is better.
    pub weight: f64,
}

/// Per-request execution budget.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    /// Wall-clock ceiling for the whole orchestration.
    pub wall_ms: u64,
    /// Token ceiling across all branches.
    pub tokens: u64,
    /// Dollar ceiling across all branches.
    pub usd: f64,
}

impl Budget {
    /// Per-branch slice of the budget given a branch count.
    ///
    /// Wall time is shared (branches run concurrently); tokens and dollars
    /// are divided so the worst-case sum stays within the over-provisioned
    /// request budget.
    #[must_use]
    pub fn per_branch(&self, branch_count: usize) -> Budget {
        let n = branch_count.max(1) as u64;
        Budget {
            wall_ms: self.wall_ms,
            tokens: self.tokens / n,
            usd: self.usd / n as f64,
        }
    }
}

/// The router's full plan for one request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Complexity bucket.
    pub complexity: Complexity,
    /// Dominant context.
    pub primary_context: PrimaryContext,
    /// Persona carried through from validation (drives scoring heuristics).
    pub persona: Persona,
    /// Execution strategy.
    pub strategy: Strategy,
    /// Ordered candidates. Non-empty; all `(provider, model)` pairs resolve
    /// in the registry.
    pub candidates: Vec<CandidateTuple>,
    /// How branches collapse.
    pub collapse_rule: CollapseRule,
    /// Streaming behavior during the run.
    pub stream_mode: StreamMode,
    /// Request-level budget.
    pub budget: Budget,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
