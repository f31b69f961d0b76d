//! The quantum executor — speculative fan-out with a deterministic collapse.
//!
//! Forks N branches over diversified candidates, monitors them
//! concurrently, and collapses the set to one winner by the route's
//! collapse rule. Losers are cancelled through their tokens; their
//! accounting still aggregates. Candidate-set caps are applied
//! deterministically before execution starts, never mid-flight.

use std::sync::Arc;

use metrics::counter;
use quorum_core::branch::{BranchExecution, BranchStatus};
use quorum_core::errors::{EngineError, ErrorKind};
use quorum_core::events::{BranchAnnouncement, ExecuteEvent};
use quorum_core::ids::BranchId;
use quorum_core::request::NormalizedRequest;
use quorum_core::route::{
    AgentRole, Budget, CandidateTuple, CollapseRule, RouteDecision, StreamMode,
};
use quorum_providers::ProviderRegistry;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::branch::{BranchRun, TokenDisposition, run_branch};
use crate::config::EngineConfig;
use crate::scoring::{normalize_output, pick_winner, score_branch};
use crate::sink::EventSink;

/// Result of a quantum run: every branch terminal, one winner.
pub struct QuantumOutcome {
    /// All branches, in candidate order (refinement branch last, if any).
    pub branches: Vec<BranchExecution>,
    /// Index of the winning branch in `branches`.
    pub winner: usize,
}

/// Runs speculative branch sets to collapse.
pub struct QuantumExecutor {
    registry: Arc<ProviderRegistry>,
    config: EngineConfig,
}

impl QuantumExecutor {
    /// Create an executor.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Run `candidates` concurrently and collapse to one winner.
    ///
    /// `announce` controls whether this run emits the `meta` event (the
    /// coordinator suppresses it for inner stages of composite strategies).
    #[instrument(skip_all, fields(
        request_id = %request.request.id,
        collapse = ?collapse,
        candidates = candidates.len(),
    ))]
    pub async fn run(
        &self,
        request: &Arc<NormalizedRequest>,
        decision: &RouteDecision,
        candidates: Vec<CandidateTuple>,
        collapse: CollapseRule,
        sink: &Arc<dyn EventSink>,
        cancel: &CancellationToken,
        announce: bool,
    ) -> Result<QuantumOutcome, EngineError> {
        // Deterministic pre-flight: trim to cap, canonicalize, validate.
        let candidates = trim_candidates(candidates, self.config.max_branches);
        let candidates = self.canonicalize(candidates)?;
        if candidates.is_empty() {
            return Err(EngineError::Routing("empty candidate set".into()));
        }

        let branch_ids: Vec<BranchId> =
            candidates.iter().map(|_| BranchId::generate()).collect();
        if announce {
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
        }

        let branch_budget = self.slice_budget(decision.budget, candidates.len());
        let stream_leader = decision.stream_mode == StreamMode::TentativeLeader;

        let mut join_set: JoinSet<(usize, BranchExecution)> = JoinSet::new();
        let mut tokens = Vec::with_capacity(candidates.len());
        for (index, candidate) in candidates.iter().enumerate() {
            let token = cancel.child_token();
            tokens.push(token.clone());
            let run = BranchRun {
                registry: Arc::clone(&self.registry),
                request: Arc::clone(request),
                branch_id: branch_ids[index].clone(),
                candidate: candidate.clone(),
                candidate_index: index,
                budget: branch_budget,
                retry: self.config.retry.clone(),
                sink: Arc::clone(sink),
                tokens: if stream_leader && index == 0 {
                    TokenDisposition::Stream
                } else {
                    TokenDisposition::Silent
                },
                cancel: token,
            };
            let _abort = join_set.spawn(async move { (index, run_branch(run).await) });
        }

        // Collect every branch to a terminal state. Under first-success the
        // first winner cancels the rest mid-collection.
        let mut slots: Vec<Option<BranchExecution>> = candidates.iter().map(|_| None).collect();
        let mut first_winner: Option<usize> = None;
        while let Some(joined) = join_set.join_next().await {
            let Ok((index, branch)) = joined else {
                // A panicked branch task; record as unknown failure.
                warn!("branch task panicked");
                continue;
            };
            if collapse == CollapseRule::FirstSuccess
                && branch.status == BranchStatus::Succeeded
                && first_winner.is_none()
            {
                first_winner = Some(index);
                debug!(index, "first success; cancelling remaining branches");
                for (i, token) in tokens.iter().enumerate() {
                    if i != index {
                        token.cancel();
                    }
                }
            }
            slots[index] = Some(branch);
        }

        let mut branches: Vec<BranchExecution> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    // Panicked task: synthesize a failed record so indexes
                    // stay aligned with candidates.
                    let mut b =
                        BranchExecution::pending(candidates[index].clone(), index);
                    b.start();
                    b.fail(ErrorKind::Unknown, "branch task aborted");
                    b
                })
            })
            .collect();

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let winner = match collapse {
            // Completion observation order can race; the record's own
            // timestamps are authoritative for who succeeded first.
            CollapseRule::FirstSuccess => earliest_success(&branches).or(first_winner),
            CollapseRule::BestOfN => self.collapse_best_of_n(&mut branches, request),
            CollapseRule::WeightedVote => self.collapse_weighted_vote(&mut branches, request),
            CollapseRule::ConsensusThenRefine => {
                match self.collapse_consensus(&mut branches, request) {
                    Some(consensus) => {
                        let refined = self
                            .refine(
                                request,
                                decision,
                                &branches,
                                consensus,
                                sink,
                                cancel,
                            )
                            .await;
                        branches.push(refined);
                        let last = branches.len() - 1;
                        if branches[last].status == BranchStatus::Succeeded {
                            Some(last)
                        } else {
                            // Refinement is optional: fall back to consensus.
                            Some(consensus)
                        }
                    }
                    None => None,
                }
            }
        };

        let Some(winner) = winner else {
            let (kind, message) = dominant_error(&branches);
            counter!("collapse_total", "outcome" => "all_failed").increment(1);
            return Err(EngineError::AllBranchesFailed { kind, message });
        };

        // Collapse cancels every non-winning branch that is still somehow
        // live; terminal records ignore it.
        for (i, token) in tokens.iter().enumerate() {
            if i != winner {
                token.cancel();
            }
        }

        if stream_leader && winner != 0 {
            sink.emit(ExecuteEvent::Superseded {
                previous_branch_id: branches[0].branch_id.clone(),
                new_branch_id: branches[winner].branch_id.clone(),
            });
            if let Some(output) = &branches[winner].final_output {
                sink.emit(ExecuteEvent::Token {
                    branch_id: branches[winner].branch_id.clone(),
                    text: output.clone(),
                });
            }
        }

        counter!("collapse_total", "outcome" => "winner").increment(1);
        info!(
            winner,
            status = %branches[winner].status,
            "collapse complete"
        );
        Ok(QuantumOutcome { branches, winner })
    }

    /// Score succeeded branches and pick the max.
    fn collapse_best_of_n(
        &self,
        branches: &mut [BranchExecution],
        request: &NormalizedRequest,
    ) -> Option<usize> {
        for branch in branches.iter_mut() {
            if branch.status == BranchStatus::Succeeded {
                branch.score = Some(score_branch(
                    branch,
                    request.request.task_kind,
                    request.persona,
                ));
            }
        }
        pick_winner(branches, request.request.task_kind, request.persona)
    }

    /// Weight-weighted vote over normalized outputs; falls back to
    /// best-of-n when no group carries a strict majority of the weight.
    fn collapse_weighted_vote(
        &self,
        branches: &mut [BranchExecution],
        request: &NormalizedRequest,
    ) -> Option<usize> {
        let groups = output_groups(branches);
        let total_weight: f64 = branches
            .iter()
            .filter(|b| b.status == BranchStatus::Succeeded)
            .map(|b| b.candidate.weight)
            .sum();

        let majority = groups.into_iter().find(|(_, members)| {
            let weight: f64 = members
                .iter()
                .map(|&i| branches[i].candidate.weight)
                .sum();
            weight * 2.0 > total_weight
        });

        match majority {
            Some((_, members)) => {
                debug!(votes = members.len(), "weighted vote reached majority");
                members.into_iter().min()
            }
            None => {
                debug!("no weighted majority; falling back to best-of-n");
                self.collapse_best_of_n(branches, request)
            }
        }
    }

    /// Majority by normalized output equality (head count). Falls back to
    /// best-of-n when no strict majority exists.
    fn collapse_consensus(
        &self,
        branches: &mut [BranchExecution],
        request: &NormalizedRequest,
    ) -> Option<usize> {
        let succeeded = branches
            .iter()
            .filter(|b| b.status == BranchStatus::Succeeded)
            .count();
        if succeeded == 0 {
            return None;
        }
        let groups = output_groups(branches);
        let majority = groups
            .into_iter()
            .find(|(_, members)| members.len() * 2 > succeeded);
        match majority {
            Some((_, members)) => members.into_iter().min(),
            None => self.collapse_best_of_n(branches, request),
        }
    }

    /// Run the sequential refinement branch on a consensus output.
    async fn refine(
        &self,
        request: &Arc<NormalizedRequest>,
        decision: &RouteDecision,
        branches: &[BranchExecution],
        consensus: usize,
        sink: &Arc<dyn EventSink>,
        cancel: &CancellationToken,
    ) -> BranchExecution {
        let winner = &branches[consensus];
        let mut candidate = winner.candidate.clone();
        candidate.agent_role = AgentRole::Refiner;

        let refined_request = Arc::new(refinement_request(
            request,
            winner.final_output.as_deref().unwrap_or(""),
        ));
        let run = BranchRun {
            registry: Arc::clone(&self.registry),
            request: refined_request,
            branch_id: BranchId::generate(),
            candidate,
            candidate_index: branches.len(),
            budget: self.slice_budget(decision.budget, branches.len().max(1)),
            retry: self.config.retry.clone(),
            sink: Arc::clone(sink),
            tokens: TokenDisposition::Silent,
            cancel: cancel.child_token(),
        };
        run_branch(run).await
    }

    /// Per-branch slice with over-provisioning on tokens and dollars.
    fn slice_budget(&self, budget: Budget, branch_count: usize) -> Budget {
        let n = branch_count.max(1) as u64;
        Budget {
            wall_ms: budget.wall_ms,
            tokens: ((budget.tokens as f64 * self.config.over_provision_factor) as u64 / n)
                .max(1),
            usd: budget.usd * self.config.over_provision_factor / n as f64,
        }
    }

    /// Canonicalize every candidate upfront; no branch may start with an
    /// unresolvable `(provider, model)`.
    fn canonicalize(
        &self,
        mut candidates: Vec<CandidateTuple>,
    ) -> Result<Vec<CandidateTuple>, EngineError> {
        for candidate in &mut candidates {
            match self
                .registry
                .resolve(&candidate.provider_id, &candidate.model_id)
            {
                Ok((_, canonical)) => candidate.model_id = canonical,
                Err(err) => {
                    return Err(EngineError::InvalidModel(format!(
                        "{}/{}: {err}",
                        candidate.provider_id, candidate.model_id
                    )));
                }
            }
        }
        Ok(candidates)
    }
}

/// Trim to `cap` by dropping lowest-weight candidates first (ties drop the
/// later candidate). Preserves the relative order of survivors.
#[must_use]
pub fn trim_candidates(candidates: Vec<CandidateTuple>, cap: usize) -> Vec<CandidateTuple> {
    if candidates.len() <= cap {
        return candidates;
    }
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    // Keep the heaviest `cap`; equal weights keep the earlier candidate.
    order.sort_by(|&a, &b| {
        candidates[b]
            .weight
            .partial_cmp(&candidates[a].weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    let mut keep: Vec<usize> = order.into_iter().take(cap).collect();
    keep.sort_unstable();
    let mut kept = Vec::with_capacity(cap);
    let mut candidates = candidates;
    for index in keep.into_iter().rev() {
        kept.push(candidates.swap_remove(index));
    }
    kept.reverse();
    kept
}

/// Group succeeded branch indexes by normalized output.
fn output_groups(branches: &[BranchExecution]) -> Vec<(String, Vec<usize>)> {
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for (index, branch) in branches.iter().enumerate() {
        if branch.status != BranchStatus::Succeeded {
            continue;
        }
        let key = normalize_output(branch.final_output.as_deref().unwrap_or(""));
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(index),
            None => groups.push((key, vec![index])),
        }
    }
    // Largest group first; ties keep first-seen order (stable sort).
    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    groups
}

/// The succeeded branch with the earliest `finished_at` (ties break on
/// lower candidate index).
fn earliest_success(branches: &[BranchExecution]) -> Option<usize> {
    branches
        .iter()
        .enumerate()
        .filter(|(_, b)| b.status == BranchStatus::Succeeded)
        .min_by_key(|(index, b)| (b.finished_at, *index))
        .map(|(index, _)| index)
}

/// The most informative error among failed branches.
fn dominant_error(branches: &[BranchExecution]) -> (ErrorKind, String) {
    let mut best: Option<(ErrorKind, String)> = None;
    for branch in branches {
        let Some(kind) = branch.error_kind else {
            continue;
        };
        let message = branch
            .error_message
            .clone()
            .unwrap_or_else(|| kind.to_string());
        if best
            .as_ref()
            .is_none_or(|(k, _)| kind.priority() > k.priority())
        {
            best = Some((kind, message));
        }
    }
    best.unwrap_or((ErrorKind::Unknown, "no branches executed".into()))
}

/// Derive a refinement request whose prompt carries the candidate answer.
#[must_use]
pub fn refinement_request(request: &NormalizedRequest, output: &str) -> NormalizedRequest {
    let mut refined = request.clone();
    refined.enhanced_prompt = format!(
        "{}\n\nCandidate answer:\n{output}\n\nRefine the candidate answer above.",
        request.enhanced_prompt
    );
    refined
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
