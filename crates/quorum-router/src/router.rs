//! The router: strategy selection, candidate selection, budget derivation.
//!
//! Everything is deterministic for a fixed manifest and configuration.
//! Candidate selection honors the caller's provider preferences first, then
//! fills remaining slots by capability match in manifest order. Fan-out
//! strategies get diversified candidates: a `(provider, model)` pair repeats
//! only with materially different sampling parameters.

use std::sync::Arc;

use quorum_core::request::NormalizedRequest;
use quorum_core::route::{
    AgentRole, Budget, CandidateTuple, CollapseRule, Complexity, GenerationParams,
    PrimaryContext, RouteDecision, StreamMode, Strategy,
};
use quorum_providers::ProviderRegistry;
use quorum_providers::manifest::ModelEntry;
use tracing::{debug, info, instrument};

use crate::complexity;
use crate::context;

/// Temperature ladder for diversified fan-out, indexed by candidate slot.
/// Rungs are pairwise ≥ 0.2 apart so reused `(provider, model)` pairs
/// always differ materially.
const TEMPERATURE_LADDER: [f64; 5] = [0.2, 0.7, 0.4, 0.9, 0.0];

/// Weight bonus for caller-preferred candidates.
const PREFERRED_WEIGHT_BONUS: f64 = 0.2;

/// Router configuration.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Hard cap on branches per request.
    pub max_branches: usize,
    /// Base branch count for quantum runs.
    pub quantum_branches: usize,
    /// Wall budget when the caller sets none.
    pub default_wall_ms: u64,
    /// Token budget when the caller sets none.
    pub default_tokens: u64,
    /// Dollar budget when the caller sets none.
    pub default_usd: f64,
    /// Output ceiling per branch when the model allows more.
    pub default_max_output_tokens: u64,
    /// Force a collapse rule regardless of strategy (testing, tuning).
    pub collapse_override: Option<CollapseRule>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_branches: 5,
            quantum_branches: 3,
            default_wall_ms: 30_000,
            default_tokens: 100_000,
            default_usd: 1.0,
            default_max_output_tokens: 4096,
            collapse_override: None,
        }
    }
}

/// Routing failure.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RouterError {
    /// No `(provider, model)` in the registry can serve this request.
    #[error("no capable candidates for context {context}")]
    NoCandidates {
        /// The context we searched for.
        context: PrimaryContext,
    },

    /// A caller-preferred model exists but cannot be mapped.
    #[error("preferred model not resolvable: {model_id}")]
    UnknownPreferredModel {
        /// The offending model ID.
        model_id: String,
    },
}

/// Turns a [`NormalizedRequest`] into a [`RouteDecision`].
pub struct Router {
    registry: Arc<ProviderRegistry>,
    config: RouterConfig,
}

impl Router {
    /// Create a router over a registry.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, config: RouterConfig) -> Self {
        Self { registry, config }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Produce the execution plan for a request.
    #[instrument(skip_all, fields(request_id = %request.request.id))]
    pub fn route(&self, request: &NormalizedRequest) -> Result<RouteDecision, RouterError> {
        let complexity = complexity::score(request);
        let primary_context = context::detect(request);
        let strategy = self.select_strategy(complexity, primary_context);
        let branch_count = self.branch_count(strategy);

        let candidates = self.select_candidates(request, strategy, primary_context, branch_count)?;

        let collapse_rule = self
            .config
            .collapse_override
            .unwrap_or_else(|| default_collapse_rule(strategy));

        // Tentative-leader streaming is mandatory for a streamed race. A
        // single-branch run streams its only branch the same way.
        // Everything else buffers until collapse.
        let stream_mode = if request.request.constraints.stream
            && (collapse_rule == CollapseRule::FirstSuccess || strategy == Strategy::Single)
        {
            StreamMode::TentativeLeader
        } else {
            StreamMode::Buffered
        };

        let budget = self.derive_budget(request);

        info!(
            complexity = ?complexity,
            context = %primary_context,
            strategy = %strategy,
            candidates = candidates.len(),
            "routed request"
        );

        Ok(RouteDecision {
            complexity,
            primary_context,
            persona: request.persona,
            strategy,
            candidates,
            collapse_rule,
            stream_mode,
            budget,
        })
    }

    /// The strategy table.
    fn select_strategy(&self, complexity: Complexity, context: PrimaryContext) -> Strategy {
        match complexity {
            Complexity::Trivial | Complexity::Simple => Strategy::Single,
            Complexity::Moderate => match context {
                PrimaryContext::CodeAnalysis | PrimaryContext::Security => Strategy::Sequential,
                _ => Strategy::Parallel,
            },
            Complexity::Complex => Strategy::Quantum,
            Complexity::Critical => Strategy::Hybrid,
        }
    }

    /// Branches per strategy, capped by `max_branches`.
    fn branch_count(&self, strategy: Strategy) -> usize {
        let count = match strategy {
            Strategy::Single => 1,
            Strategy::Sequential | Strategy::Parallel => 2,
            Strategy::Quantum => self.config.quantum_branches.max(3),
            // Quantum core plus the refinement stage.
            Strategy::Hybrid => self.config.quantum_branches.max(3) + 1,
        };
        count.min(self.config.max_branches)
    }

    /// Capability tag for the registry query.
    fn capability_tags(context: PrimaryContext) -> Vec<&'static str> {
        match context {
            PrimaryContext::Other => vec![],
            other => vec![other.as_str()],
        }
    }

    /// Pick ordered, diversified candidates.
    fn select_candidates(
        &self,
        request: &NormalizedRequest,
        strategy: Strategy,
        context: PrimaryContext,
        branch_count: usize,
    ) -> Result<Vec<CandidateTuple>, RouterError> {
        let tags = Self::capability_tags(context);
        let capable = self.registry.list_capable(&tags);
        // A specialist context with no capable model still routes: any
        // configured model beats refusing the request.
        let capable = if capable.is_empty() {
            self.registry.list_capable(&[])
        } else {
            capable
        };
        if capable.is_empty() {
            return Err(RouterError::NoCandidates { context });
        }

        // Ordered (provider, model) pool: caller preferences first, then
        // capability matches in manifest order.
        let mut pool: Vec<(String, String, bool)> = Vec::new();
        let mut push_unique = |pool: &mut Vec<(String, String, bool)>,
                               provider: &str,
                               model: &str,
                               preferred: bool| {
            if !pool.iter().any(|(p, m, _)| p == provider && m == model) {
                pool.push((provider.to_string(), model.to_string(), preferred));
            }
        };

        for provider in &request.request.preferred_providers {
            // Their preferred model on this provider, if any resolves.
            let model = request
                .request
                .preferred_models
                .iter()
                .filter_map(|m| self.registry.manifest().find(m))
                .find(|e| &e.provider_id == provider)
                .map(|e| e.model_id.clone())
                .or_else(|| {
                    capable
                        .iter()
                        .find(|e| &e.provider_id == provider)
                        .map(|e| e.model_id.clone())
                });
            if let Some(model) = model {
                push_unique(&mut pool, provider, &model, true);
            } else {
                debug!(provider, "preferred provider has no capable model; skipping");
            }
        }

        for model in &request.request.preferred_models {
            if let Some(entry) = self.registry.manifest().find(model) {
                push_unique(&mut pool, &entry.provider_id, &entry.model_id, true);
            } else {
                debug!(model, "preferred model not in manifest; skipping");
            }
        }

        for entry in &capable {
            push_unique(&mut pool, &entry.provider_id, &entry.model_id, false);
        }

        // Materialize candidates. When the pool is smaller than the branch
        // count, reuse pairs with a different temperature rung — that keeps
        // the set diversified in the material-params sense.
        let mut candidates = Vec::with_capacity(branch_count);
        for slot in 0..branch_count {
            let (provider_id, model_id, preferred) = pool[slot % pool.len()].clone();
            let entry = self
                .registry
                .manifest()
                .find(&model_id)
                .expect("pool entries come from the manifest");
            let role = role_for(strategy, slot, branch_count);
            candidates.push(CandidateTuple {
                agent_role: role,
                provider_id,
                model_id,
                params: self.params_for(entry, slot, request),
                weight: weight_for(slot, preferred),
            });
        }

        Ok(candidates)
    }

    fn params_for(
        &self,
        entry: &ModelEntry,
        slot: usize,
        request: &NormalizedRequest,
    ) -> GenerationParams {
        let ceiling = request
            .request
            .constraints
            .max_tokens
            .unwrap_or(self.config.default_max_output_tokens);
        GenerationParams {
            temperature: TEMPERATURE_LADDER[slot % TEMPERATURE_LADDER.len()],
            top_p: None,
            max_output_tokens: ceiling.min(entry.max_output_tokens),
            system_prompt_overlay: None,
        }
    }

    /// Budget from constraints with configured defaults.
    fn derive_budget(&self, request: &NormalizedRequest) -> Budget {
        let constraints = &request.request.constraints;
        Budget {
            wall_ms: constraints.max_latency_ms.unwrap_or(self.config.default_wall_ms),
            tokens: constraints.max_tokens.unwrap_or(self.config.default_tokens),
            usd: constraints.max_cost_usd.unwrap_or(self.config.default_usd),
        }
    }
}

/// Collapse rule implied by the strategy table.
fn default_collapse_rule(strategy: Strategy) -> CollapseRule {
    match strategy {
        Strategy::Parallel => CollapseRule::FirstSuccess,
        Strategy::Single | Strategy::Sequential | Strategy::Quantum | Strategy::Hybrid => {
            CollapseRule::BestOfN
        }
    }
}

/// Role per slot per strategy.
fn role_for(strategy: Strategy, slot: usize, branch_count: usize) -> AgentRole {
    match strategy {
        Strategy::Single | Strategy::Parallel | Strategy::Quantum => AgentRole::Generator,
        Strategy::Sequential => {
            if slot == 0 {
                AgentRole::Analyzer
            } else {
                AgentRole::Synthesizer
            }
        }
        Strategy::Hybrid => {
            if slot + 1 == branch_count {
                AgentRole::Refiner
            } else {
                AgentRole::Generator
            }
        }
    }
}

/// Monotone decreasing prior; preferred candidates get a bonus.
fn weight_for(slot: usize, preferred: bool) -> f64 {
    let base = 1.0 - 0.05 * slot as f64;
    if preferred {
        base + PREFERRED_WEIGHT_BONUS
    } else {
        base
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
