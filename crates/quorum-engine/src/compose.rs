//! Prompt composition.
//!
//! `compose(persona_overlay, agent_overlay, task_template, user_content)` —
//! a pure function from the normalized request and candidate to the final
//! system and user prompts. File content is truncated to the model's
//! context window deterministically: files referenced in the prompt first
//! (most recently referenced leading), then the rest in path order.

use quorum_core::request::{FileAttachment, NormalizedRequest, TaskKind};
use quorum_core::route::{AgentRole, CandidateTuple};
use quorum_providers::tokens::estimate_tokens;
use quorum_router::persona::overlay;

/// Tokens reserved for the model's answer and structural overhead when
/// fitting files into the context window.
const CONTEXT_RESERVE_TOKENS: u64 = 1024;

/// The assembled prompts for one upstream call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposedPrompt {
    /// System prompt: persona overlay, role overlay, task template, and any
    /// candidate overlay, in that order.
    pub system_prompt: String,
    /// User prompt: enhanced prompt plus fitted file content.
    pub user_prompt: String,
}

/// Role-specific system overlay.
#[must_use]
pub fn role_overlay(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Generator => "Produce the requested artifact directly.",
        AgentRole::Analyzer => {
            "Analyze the input thoroughly before concluding. Surface assumptions."
        }
        AgentRole::Synthesizer => {
            "Synthesize the analysis below into a single, complete answer."
        }
        AgentRole::Verifier => {
            "Verify the candidate answer below. Point out concrete defects or confirm it."
        }
        AgentRole::Refiner => {
            "Refine the candidate answer below. Keep what is correct, fix what is not."
        }
    }
}

/// Task-kind template appended to the system prompt.
#[must_use]
pub fn task_template(task_kind: TaskKind) -> &'static str {
    match task_kind {
        TaskKind::CodeGeneration => {
            "Task: code generation. Return complete, compilable code in a fenced block."
        }
        TaskKind::CodeAnalysis => {
            "Task: code analysis. Explain behavior, risks, and notable structure."
        }
        TaskKind::Testing => {
            "Task: testing. Return runnable tests covering the important edge cases."
        }
        TaskKind::Custom => "Task: follow the user's instructions exactly.",
    }
}

/// Assemble the final prompts for a candidate. Pure and deterministic.
#[must_use]
pub fn compose(
    request: &NormalizedRequest,
    candidate: &CandidateTuple,
    context_window: u64,
) -> ComposedPrompt {
    let mut system_parts = vec![
        overlay(request.persona).to_string(),
        role_overlay(candidate.agent_role).to_string(),
        task_template(request.request.task_kind).to_string(),
    ];
    if let Some(extra) = &candidate.params.system_prompt_overlay {
        system_parts.push(extra.clone());
    }
    let system_prompt = system_parts.join("\n\n");

    // Enhanced prompt already carries the persona overlay; the system
    // prompt carries it too, so strip the duplicate from the user side.
    let user_core = request
        .enhanced_prompt
        .strip_prefix(overlay(request.persona))
        .map_or(request.enhanced_prompt.as_str(), str::trim_start);

    let mut user_prompt = user_core.to_string();

    if !request.request.files.is_empty() {
        let budget_tokens = context_window
            .saturating_sub(estimate_tokens(&system_prompt, &candidate.model_id))
            .saturating_sub(estimate_tokens(&user_prompt, &candidate.model_id))
            .saturating_sub(candidate.params.max_output_tokens)
            .saturating_sub(CONTEXT_RESERVE_TOKENS);
        let fitted = fit_files(&request.request.files, user_core, budget_tokens);
        if !fitted.is_empty() {
            user_prompt.push_str("\n\n");
            user_prompt.push_str(&fitted);
        }
    }

    ComposedPrompt {
        system_prompt,
        user_prompt,
    }
}

/// Order files for inclusion: referenced-in-prompt first (most recently
/// referenced leading), then unreferenced in path order.
fn ordered_files<'a>(files: &'a [FileAttachment], prompt: &str) -> Vec<&'a FileAttachment> {
    let mut referenced: Vec<(usize, &FileAttachment)> = files
        .iter()
        .filter_map(|f| prompt.rfind(&f.path).map(|pos| (pos, f)))
        .collect();
    // Later mention in the prompt = more recently referenced.
    referenced.sort_by(|a, b| b.0.cmp(&a.0));

    let mut unreferenced: Vec<&FileAttachment> = files
        .iter()
        .filter(|f| !prompt.contains(&f.path))
        .collect();
    unreferenced.sort_by(|a, b| a.path.cmp(&b.path));

    referenced
        .into_iter()
        .map(|(_, f)| f)
        .chain(unreferenced)
        .collect()
}

/// Render files into the prompt within a token budget. Whole files are
/// preferred; the first file that does not fit is truncated and the rest
/// are dropped.
fn fit_files(files: &[FileAttachment], prompt: &str, budget_tokens: u64) -> String {
    let mut remaining_chars = (budget_tokens * 4) as usize;
    let mut out = String::new();

    for file in ordered_files(files, prompt) {
        if remaining_chars < 64 {
            break;
        }
        let header = match &file.language {
            Some(lang) => format!("--- {} ({lang}) ---\n", file.path),
            None => format!("--- {} ---\n", file.path),
        };
        if header.len() >= remaining_chars {
            break;
        }
        remaining_chars -= header.len();

        let body: String = if file.content.len() <= remaining_chars {
            file.content.clone()
        } else {
            let mut truncated: String = file.content.chars().take(remaining_chars).collect();
            truncated.push_str("\n[truncated]");
            truncated
        };
        remaining_chars = remaining_chars.saturating_sub(body.len());

        out.push_str(&header);
        out.push_str(&body);
        out.push('\n');
    }

    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
