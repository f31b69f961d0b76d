//! The orchestration coordinator.
//!
//! Composes the branch and quantum executors into the five strategies.
//! Every strategy obeys the same budget, cancellation, and streaming rules
//! and produces exactly one [`OrchestrationResult`] or one error.

use std::sync::Arc;
use std::time::Instant;

use quorum_core::branch::{Aggregate, BranchExecution, BranchStatus, OrchestrationResult};
use quorum_core::errors::EngineError;
use quorum_core::events::{BranchAnnouncement, ExecuteEvent};
use quorum_core::ids::BranchId;
use quorum_core::request::NormalizedRequest;
use quorum_core::route::{
    AgentRole, Budget, CollapseRule, RouteDecision, StreamMode, Strategy,
};
use quorum_providers::ProviderRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::branch::{BranchRun, TokenDisposition, run_branch};
use crate::config::EngineConfig;
use crate::quantum::{QuantumExecutor, refinement_request};
use crate::sink::EventSink;

/// Chooses and composes execution strategies for a routed request.
pub struct Coordinator {
    registry: Arc<ProviderRegistry>,
    config: EngineConfig,
    quantum: QuantumExecutor,
}

impl Coordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, config: EngineConfig) -> Self {
        let quantum = QuantumExecutor::new(Arc::clone(&registry), config.clone());
        Self {
            registry,
            config,
            quantum,
        }
    }

    /// Execute the strategy in the route decision.
    #[instrument(skip_all, fields(
        request_id = %request.request.id,
        strategy = %decision.strategy,
    ))]
    pub async fn orchestrate(
        &self,
        request: &Arc<NormalizedRequest>,
        decision: &RouteDecision,
        sink: &Arc<dyn EventSink>,
        cancel: &CancellationToken,
    ) -> Result<OrchestrationResult, EngineError> {
        if decision.candidates.is_empty() {
            return Err(EngineError::Routing("route decision has no candidates".into()));
        }
        let started = Instant::now();

        let (branches, winner) = match decision.strategy {
            Strategy::Single => {
                let candidates = decision.candidates[..1].to_vec();
                let outcome = self
                    .quantum
                    .run(
                        request,
                        decision,
                        candidates,
                        CollapseRule::FirstSuccess,
                        sink,
                        cancel,
                        true,
                    )
                    .await?;
                (outcome.branches, outcome.winner)
            }
            Strategy::Sequential => self.run_sequential(request, decision, sink, cancel).await?,
            Strategy::Parallel => {
                let outcome = self
                    .quantum
                    .run(
                        request,
                        decision,
                        decision.candidates.clone(),
                        CollapseRule::FirstSuccess,
                        sink,
                        cancel,
                        true,
                    )
                    .await?;
                (outcome.branches, outcome.winner)
            }
            Strategy::Quantum => {
                let outcome = self
                    .quantum
                    .run(
                        request,
                        decision,
                        decision.candidates.clone(),
                        decision.collapse_rule,
                        sink,
                        cancel,
                        true,
                    )
                    .await?;
                (outcome.branches, outcome.winner)
            }
            Strategy::Hybrid => self.run_hybrid(request, decision, sink, cancel).await?,
        };

        let result = assemble(request, decision, branches, winner, started);

        // Buffered streaming flushes the winning output at collapse.
        if request.request.constraints.stream && decision.stream_mode == StreamMode::Buffered {
            sink.emit(ExecuteEvent::Token {
                branch_id: result.chosen_branch_id.clone(),
                text: result.output.clone(),
            });
        }

        info!(
            winner = %result.chosen_branch_id,
            cost_usd = result.aggregate.cost_usd,
            wall_ms = result.aggregate.wall_ms,
            "orchestration complete"
        );
        Ok(result)
    }

    /// Ordered pipeline: each stage's output feeds the next stage.
    ///
    /// A failed mandatory stage aborts; verifier/refiner stages are
    /// optional — their failure keeps the prior stage's output.
    async fn run_sequential(
        &self,
        request: &Arc<NormalizedRequest>,
        decision: &RouteDecision,
        sink: &Arc<dyn EventSink>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<BranchExecution>, usize), EngineError> {
        let candidates = &decision.candidates;
        let branch_ids: Vec<BranchId> =
            candidates.iter().map(|_| BranchId::generate()).collect();
        sink.emit(ExecuteEvent::Meta {
            request_id: request.request.id.clone(),
            strategy: decision.strategy,
            branches: candidates
                .iter()
                .zip(&branch_ids)
                .map(|(candidate, id)| BranchAnnouncement {
                    branch_id: id.clone(),
                    candidate: candidate.clone(),
                })
                .collect(),
        });

        let stage_budget = split_budget(decision.budget, candidates.len());
        let started = Instant::now();
        let mut branches: Vec<BranchExecution> = Vec::with_capacity(candidates.len());
        let mut winner: Option<usize> = None;

        for (index, candidate) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let stage_request = match winner {
                None => Arc::clone(request),
                Some(w) => Arc::new(chained_request(
                    request,
                    branches[w].final_output.as_deref().unwrap_or(""),
                )),
            };

            let elapsed = started.elapsed().as_millis() as u64;
            let remaining_wall = decision.budget.wall_ms.saturating_sub(elapsed);
            if remaining_wall == 0 {
                return Err(EngineError::Timeout {
                    wall_ms: elapsed,
                });
            }

            let branch = run_branch(BranchRun {
                registry: Arc::clone(&self.registry),
                request: stage_request,
                branch_id: branch_ids[index].clone(),
                candidate: candidate.clone(),
                candidate_index: index,
                budget: Budget {
                    wall_ms: remaining_wall,
                    ..stage_budget
                },
                retry: self.config.retry.clone(),
                sink: Arc::clone(sink),
                tokens: TokenDisposition::Silent,
                cancel: cancel.child_token(),
            })
            .await;

            let succeeded = branch.status == BranchStatus::Succeeded;
            let optional = is_optional_stage(candidate.agent_role);
            branches.push(branch);

            if succeeded {
                winner = Some(index);
            } else if !optional {
                let failed = &branches[index];
                if failed.status == BranchStatus::Cancelled {
                    return Err(EngineError::Cancelled);
                }
                let kind = failed
                    .error_kind
                    .unwrap_or(quorum_core::errors::ErrorKind::Unknown);
                return Err(EngineError::AllBranchesFailed {
                    kind,
                    message: failed
                        .error_message
                        .clone()
                        .unwrap_or_else(|| format!("stage {index} failed")),
                });
            } else {
                debug!(index, "optional stage failed; keeping prior output");
            }
        }

        let winner = winner.ok_or_else(|| EngineError::Internal("no stage produced output".into()))?;
        Ok((branches, winner))
    }

    /// Quantum core, then one sequential refinement stage seeded with the
    /// winner's output. The refinement stage is optional.
    async fn run_hybrid(
        &self,
        request: &Arc<NormalizedRequest>,
        decision: &RouteDecision,
        sink: &Arc<dyn EventSink>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<BranchExecution>, usize), EngineError> {
        let core: Vec<_> = decision
            .candidates
            .iter()
            .filter(|c| c.agent_role != AgentRole::Refiner)
            .cloned()
            .collect();

        let outcome = self
            .quantum
            .run(
                request,
                decision,
                core,
                CollapseRule::BestOfN,
                sink,
                cancel,
                true,
            )
            .await?;
        let mut branches = outcome.branches;
        let mut winner = outcome.winner;

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        // The refinement candidate comes from the route decision; when the
        // router did not mark one, refine with the winner's own tuple.
        let mut refiner = decision
            .candidates
            .iter()
            .find(|c| c.agent_role == AgentRole::Refiner)
            .cloned()
            .unwrap_or_else(|| branches[winner].candidate.clone());
        refiner.agent_role = AgentRole::Refiner;

        let refined_request = Arc::new(refinement_request(
            request,
            branches[winner].final_output.as_deref().unwrap_or(""),
        ));
        let refiner_index = branches.len();
        let branch = run_branch(BranchRun {
            registry: Arc::clone(&self.registry),
            request: refined_request,
            branch_id: BranchId::generate(),
            candidate: refiner,
            candidate_index: refiner_index,
            budget: split_budget(decision.budget, decision.candidates.len()),
            retry: self.config.retry.clone(),
            sink: Arc::clone(sink),
            tokens: TokenDisposition::Silent,
            cancel: cancel.child_token(),
        })
        .await;

        let refined_ok = branch.status == BranchStatus::Succeeded;
        branches.push(branch);
        if refined_ok {
            winner = refiner_index;
        } else {
            debug!("refinement stage failed; keeping quantum winner");
        }

        Ok((branches, winner))
    }
}

/// Even budget split for sequential stages (no over-provisioning: stages
/// run one after another, so their costs sum).
fn split_budget(budget: Budget, stages: usize) -> Budget {
    let n = stages.max(1) as u64;
    Budget {
        wall_ms: budget.wall_ms,
        tokens: (budget.tokens / n).max(1),
        usd: budget.usd / n as f64,
    }
}

/// Verification and refinement stages may fail without aborting.
fn is_optional_stage(role: AgentRole) -> bool {
    matches!(role, AgentRole::Verifier | AgentRole::Refiner)
}

/// Derive a stage request whose prompt carries the prior stage's output.
fn chained_request(request: &NormalizedRequest, prior_output: &str) -> NormalizedRequest {
    let mut chained = request.clone();
    chained.enhanced_prompt = format!(
        "{}\n\nPrevious stage output:\n{prior_output}",
        request.enhanced_prompt
    );
    chained
}

/// Assemble the exactly-once result from terminal branches.
fn assemble(
    request: &NormalizedRequest,
    decision: &RouteDecision,
    branches: Vec<BranchExecution>,
    winner: usize,
    started: Instant,
) -> OrchestrationResult {
    let mut aggregate = Aggregate::default();
    for branch in &branches {
        aggregate.absorb(branch);
    }
    aggregate.wall_ms = started.elapsed().as_millis() as u64;

    OrchestrationResult {
        request_id: request.request.id.clone(),
        chosen_branch_id: branches[winner].branch_id.clone(),
        output: branches[winner]
            .final_output
            .clone()
            .unwrap_or_default(),
        aggregate,
        strategy: decision.strategy,
        branches: branches.iter().map(BranchExecution::summary).collect(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
