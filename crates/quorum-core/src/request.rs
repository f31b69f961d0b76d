//! Request types — the immutable intake record and its normalized form.
//!
//! Wire field names are `snake_case` to match the HTTP surface. Intake
//! deserialization rejects unknown fields.

use serde::{Deserialize, Serialize};

use crate::ids::RequestId;

/// What kind of work the caller is asking for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Produce new code.
    CodeGeneration,
    /// Analyze or explain existing code.
    CodeAnalysis,
    /// Write or run tests.
    Testing,
    /// Anything else.
    Custom,
}

impl TaskKind {
    /// Stable wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CodeGeneration => "code_generation",
            Self::CodeAnalysis => "code_analysis",
            Self::Testing => "testing",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file attached to the request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileAttachment {
    /// Repository-relative path.
    pub path: String,
    /// Full file contents.
    pub content: String,
    /// Language hint, if the caller knows it.
    #[serde(default)]
    pub language: Option<String>,
}

/// Caller-imposed execution constraints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Constraints {
    /// Wall-clock ceiling for the whole request.
    #[serde(default)]
    pub max_latency_ms: Option<u64>,
    /// Dollar ceiling for the whole request.
    #[serde(default)]
    pub max_cost_usd: Option<f64>,
    /// Token ceiling for the whole request.
    #[serde(default)]
    pub max_tokens: Option<u64>,
    /// Whether the caller wants incremental events.
    #[serde(default)]
    pub stream: bool,
}

/// The intake payload. Immutable once accepted — every later stage works on
/// derived records ([`NormalizedRequest`], route decisions, branches).
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecuteRequest {
    /// Task classification.
    pub task_kind: TaskKind,
    /// The user's prompt. Must be non-empty after trimming.
    pub prompt: String,
    /// Optional persona hint ("reviewer", "tester", …).
    #[serde(default)]
    pub persona_hint: Option<String>,
    /// Attached files.
    #[serde(default)]
    pub files: Vec<FileAttachment>,
    /// Execution constraints.
    #[serde(default)]
    pub constraints: Constraints,
    /// Providers to prefer, in order.
    #[serde(default)]
    pub preferred_providers: Vec<String>,
    /// Models to prefer, in order.
    #[serde(default)]
    pub preferred_models: Vec<String>,
}

/// An accepted request with an assigned ID.
#[derive(Clone, Debug)]
pub struct Request {
    /// Assigned at intake.
    pub id: RequestId,
    /// Task classification.
    pub task_kind: TaskKind,
    /// The user's prompt.
    pub prompt: String,
    /// Optional persona hint.
    pub persona_hint: Option<String>,
    /// Attached files.
    pub files: Vec<FileAttachment>,
    /// Execution constraints.
    pub constraints: Constraints,
    /// Providers to prefer, in order.
    pub preferred_providers: Vec<String>,
    /// Models to prefer, in order.
    pub preferred_models: Vec<String>,
}

impl Request {
    /// Accept an intake payload, assigning a fresh ID.
    ///
    /// Intake validation (non-empty prompt) happens in the pipeline; this
    /// constructor only binds the identity.
    #[must_use]
    pub fn accept(payload: ExecuteRequest) -> Self {
        Self {
            id: RequestId::generate(),
            task_kind: payload.task_kind,
            prompt: payload.prompt,
            persona_hint: payload.persona_hint,
            files: payload.files,
            constraints: payload.constraints,
            preferred_providers: payload.preferred_providers,
            preferred_models: payload.preferred_models,
        }
    }

    /// Total size of attached file contents in bytes.
    #[must_use]
    pub fn total_file_bytes(&self) -> usize {
        self.files.iter().map(|f| f.content.len()).sum()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Personas
// ─────────────────────────────────────────────────────────────────────────────

/// Abstract role used to condition the prompt and scoring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    /// General implementation work.
    Developer,
    /// Code review.
    Reviewer,
    /// System design.
    Architect,
    /// Test authoring.
    Tester,
    /// Security analysis.
    Security,
    /// Documentation.
    Documenter,
}

impl Persona {
    /// Stable wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Developer => "developer",
            Self::Reviewer => "reviewer",
            Self::Architect => "architect",
            Self::Tester => "tester",
            Self::Security => "security",
            Self::Documenter => "documenter",
        }
    }

    /// Parse a persona hint. Accepts the wire strings only.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "developer" => Some(Self::Developer),
            "reviewer" => Some(Self::Reviewer),
            "architect" => Some(Self::Architect),
            "tester" => Some(Self::Tester),
            "security" => Some(Self::Security),
            "documenter" => Some(Self::Documenter),
            _ => None,
        }
    }
}

impl std::fmt::Display for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A [`Request`] after persona validation and prompt enhancement.
#[derive(Clone, Debug)]
pub struct NormalizedRequest {
    /// The accepted request.
    pub request: Request,
    /// Resolved persona. Always a known value.
    pub persona: Persona,
    /// The enhanced prompt actually sent to providers.
    pub enhanced_prompt: String,
    /// How confident the validator was, in `[0, 1]`. 0 means the default
    /// persona was forced.
    pub persona_confidence: f64,
    /// Context tags detected during validation ("architecture", …).
    pub detected_context_tags: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
