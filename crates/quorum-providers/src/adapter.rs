//! The uniform provider contract.
//!
//! Adapters expose one operation that matters: open a streaming generation
//! against the upstream API. The provided [`ProviderAdapter::generate`]
//! drains that stream, forwards deltas to a sink, observes cancellation at
//! every suspension point, and returns final accounting.
//!
//! Guarantees:
//! - Deliveries to the sink are monotonic; tokens are appended in
//!   production order, never reordered or rewritten.
//! - At most one outstanding upstream call per `generate` invocation.
//! - Cancellation aborts the upstream request (the stream is dropped) and
//!   surfaces as [`ProviderError::Cancelled`]; tokens already delivered to
//!   the sink remain accounted by the caller.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, ProviderResult};

/// Incremental sink for streamed output.
///
/// Implemented for closures so call sites can pass `&|text| …`.
pub trait DeltaSink: Send + Sync {
    /// Receive one appended text fragment.
    fn delta(&self, text: &str);
}

impl<F> DeltaSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn delta(&self, text: &str) {
        self(text);
    }
}

/// A sink that discards deltas (non-streaming callers).
pub struct NullDeltaSink;

impl DeltaSink for NullDeltaSink {
    fn delta(&self, _text: &str) {}
}

/// One upstream generation request, already flattened by the engine.
#[derive(Clone, Debug)]
pub struct GenerateCall {
    /// Canonical model ID.
    pub model_id: String,
    /// Composed system prompt (persona + role overlays).
    pub system_prompt: Option<String>,
    /// Composed user prompt (enhanced prompt + file content).
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling cutoff.
    pub top_p: Option<f64>,
    /// Output token ceiling.
    pub max_output_tokens: u64,
}

/// Final accounting for one successful generation.
#[derive(Clone, Debug, PartialEq)]
pub struct Generation {
    /// Complete output text.
    pub final_output: String,
    /// Prompt tokens as reported (or estimated) upstream.
    pub tokens_in: u64,
    /// Completion tokens as reported (or estimated) upstream.
    pub tokens_out: u64,
    /// Cost in USD computed from manifest pricing.
    pub cost_usd: f64,
    /// Unified finish reason: `end_turn`, `max_tokens`, …
    pub finish_reason: String,
}

/// Events produced while draining an upstream stream.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderEvent {
    /// Incremental output text.
    Delta(String),
    /// Stream completed; final usage attached.
    Done {
        /// Prompt tokens reported upstream (0 when unreported).
        tokens_in: u64,
        /// Completion tokens reported upstream (0 when unreported).
        tokens_out: u64,
        /// Unified finish reason.
        finish_reason: String,
    },
}

/// Boxed stream of provider events.
pub type ProviderEventStream =
    Pin<Box<dyn Stream<Item = ProviderResult<ProviderEvent>> + Send>>;

/// Uniform contract over one upstream model API.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + std::fmt::Debug {
    /// Registry ID of this provider ("anthropic", "openai", …).
    fn provider_id(&self) -> &str;

    /// Provider-consistent token estimate for `text` under `model_id`.
    fn count_tokens(&self, text: &str, model_id: &str) -> u64;

    /// Cost in USD for a completed call under manifest pricing.
    fn cost_usd(&self, model_id: &str, tokens_in: u64, tokens_out: u64) -> f64;

    /// Open a streaming generation against the upstream API.
    async fn open_stream(&self, call: &GenerateCall) -> ProviderResult<ProviderEventStream>;

    /// Produce a completion, forwarding deltas to `sink`.
    ///
    /// This is the operation the engine uses. The default implementation
    /// drains [`ProviderAdapter::open_stream`], checking `cancel` at every
    /// suspension point. A `Done` event without any preceding upstream
    /// error yields a [`Generation`]; a dropped stream without `Done` is a
    /// provider-side failure.
    async fn generate(
        &self,
        call: &GenerateCall,
        sink: &dyn DeltaSink,
        cancel: &CancellationToken,
    ) -> ProviderResult<Generation> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let mut stream = tokio::select! {
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            opened = self.open_stream(call) => opened?,
        };

        let mut output = String::new();
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => return Err(ProviderError::Cancelled),
                event = stream.next() => event,
            };
            match event {
                Some(Ok(ProviderEvent::Delta(text))) => {
                    sink.delta(&text);
                    output.push_str(&text);
                }
                Some(Ok(ProviderEvent::Done {
                    tokens_in,
                    tokens_out,
                    finish_reason,
                })) => {
                    // Some upstreams omit usage on streamed responses; fall
                    // back to local estimates so accounting never reads zero.
                    let tokens_in = if tokens_in > 0 {
                        tokens_in
                    } else {
                        self.count_tokens(&call.prompt, &call.model_id)
                    };
                    let tokens_out = if tokens_out > 0 {
                        tokens_out
                    } else {
                        self.count_tokens(&output, &call.model_id)
                    };
                    let cost_usd = self.cost_usd(&call.model_id, tokens_in, tokens_out);
                    return Ok(Generation {
                        final_output: output,
                        tokens_in,
                        tokens_out,
                        cost_usd,
                        finish_reason,
                    });
                }
                Some(Err(err)) => return Err(err),
                None => {
                    return Err(ProviderError::Api {
                        status: 502,
                        message: "stream ended without completion".into(),
                    });
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
