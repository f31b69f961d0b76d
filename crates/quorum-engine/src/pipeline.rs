//! The request pipeline: intake → persona → route → orchestrate → respond.
//!
//! Exactly one terminal outcome per accepted request: a `result` event with
//! the [`OrchestrationResult`], or a terminal `error` event. Intake and
//! routing failures report immediately with no branches executed. Caller
//! cancellation propagates through a child token to every branch; the
//! pipeline emits its terminal event only after the orchestration tree has
//! settled, so no `token` event can follow it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use metrics::{counter, histogram};
use quorum_core::branch::OrchestrationResult;
use quorum_core::errors::EngineError;
use quorum_core::events::ExecuteEvent;
use quorum_core::ids::RequestId;
use quorum_core::request::{ExecuteRequest, NormalizedRequest, Request};
use quorum_providers::ProviderRegistry;
use quorum_router::{Router, RouterConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::coordinator::Coordinator;
use crate::sink::EventSink;

/// End-to-end request execution.
pub struct RequestPipeline {
    router: Router,
    coordinator: Coordinator,
    config: EngineConfig,
    /// In-flight requests, for external cancellation and health reporting.
    active: DashMap<RequestId, CancellationToken>,
}

impl RequestPipeline {
    /// Create a pipeline over a registry.
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        router_config: RouterConfig,
        config: EngineConfig,
    ) -> Self {
        Self {
            router: Router::new(Arc::clone(&registry), router_config),
            coordinator: Coordinator::new(registry, config.clone()),
            config,
            active: DashMap::new(),
        }
    }

    /// Number of requests currently executing.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Cancel an in-flight request. Returns whether it was found.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        if let Some(entry) = self.active.get(request_id) {
            warn!(request_id = %request_id, "cancellation requested");
            entry.value().cancel();
            true
        } else {
            false
        }
    }

    /// Run one request to its single terminal outcome.
    ///
    /// The terminal `result`/`error` event is emitted on `sink` and the
    /// same outcome is returned.
    #[instrument(skip_all)]
    pub async fn execute(
        &self,
        payload: ExecuteRequest,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Result<OrchestrationResult, EngineError> {
        let started = Instant::now();
        let outcome = self.execute_inner(payload, &sink, cancel).await;

        histogram!("request_wall_ms").record(started.elapsed().as_millis() as f64);
        match &outcome {
            Ok(result) => {
                counter!("requests_total", "outcome" => "ok").increment(1);
                sink.emit(ExecuteEvent::Result {
                    result: result.clone(),
                });
            }
            Err(err) => {
                counter!("requests_total", "outcome" => "error").increment(1);
                sink.emit(ExecuteEvent::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                    retryable: err.is_retryable(),
                });
            }
        }
        outcome
    }

    async fn execute_inner(
        &self,
        payload: ExecuteRequest,
        sink: &Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Result<OrchestrationResult, EngineError> {
        // Intake. Unknown fields were already rejected at deserialization.
        let request = intake(payload)?;
        let request_id = request.id.clone();
        info!(request_id = %request_id, task_kind = %request.task_kind, "request accepted");

        // Persona.
        let resolution =
            quorum_router::validate(&request.prompt, request.persona_hint.as_deref());
        let normalized = Arc::new(NormalizedRequest {
            persona: resolution.persona,
            enhanced_prompt: resolution.enhanced_prompt,
            persona_confidence: resolution.confidence,
            detected_context_tags: resolution.tags,
            request,
        });

        // Route.
        let decision = self
            .router
            .route(&normalized)
            .map_err(|e| EngineError::Routing(e.to_string()))?;

        // Orchestrate, bounded by the wall deadline plus grace. The child
        // token ties every branch to the caller's cancellation.
        let child = cancel.child_token();
        let _guard = ActiveGuard::register(&self.active, request_id, child.clone());

        let deadline = Duration::from_millis(self.config.deadline_ms(decision.budget.wall_ms));
        let outcome = tokio::time::timeout(
            deadline,
            self.coordinator
                .orchestrate(&normalized, &decision, sink, &child),
        )
        .await;

        match outcome {
            Ok(result) => result,
            Err(_elapsed) => {
                // The orchestration future was dropped, aborting its branch
                // tasks; nothing can emit after this point.
                child.cancel();
                Err(EngineError::Timeout {
                    wall_ms: deadline.as_millis() as u64,
                })
            }
        }
    }
}

/// Intake validation. `BAD_REQUEST` on violation.
fn intake(payload: ExecuteRequest) -> Result<Request, EngineError> {
    if payload.prompt.trim().is_empty() {
        return Err(EngineError::BadRequest("prompt must be non-empty".into()));
    }
    if let Some(max_cost) = payload.constraints.max_cost_usd {
        if max_cost <= 0.0 {
            return Err(EngineError::BadRequest(
                "max_cost_usd must be positive".into(),
            ));
        }
    }
    if payload.constraints.max_latency_ms == Some(0) {
        return Err(EngineError::BadRequest(
            "max_latency_ms must be positive".into(),
        ));
    }
    Ok(Request::accept(payload))
}

/// Removes the request from the active map on drop, success or failure.
struct ActiveGuard<'a> {
    active: &'a DashMap<RequestId, CancellationToken>,
    request_id: RequestId,
}

impl<'a> ActiveGuard<'a> {
    fn register(
        active: &'a DashMap<RequestId, CancellationToken>,
        request_id: RequestId,
        token: CancellationToken,
    ) -> Self {
        let _ = active.insert(request_id.clone(), token);
        Self { active, request_id }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let _ = self.active.remove(&self.request_id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
