//! Shared test harness: scripted provider adapters and pipeline builders.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use quorum_core::errors::ErrorKind;
use quorum_core::events::ExecuteEvent;
use quorum_engine::{CollectingSink, EngineConfig, RequestPipeline};
use quorum_providers::adapter::{
    GenerateCall, ProviderAdapter, ProviderEvent, ProviderEventStream,
};
use quorum_providers::error::{ProviderError, ProviderResult};
use quorum_providers::manifest::ModelManifest;
use quorum_providers::registry::ProviderRegistry;
use quorum_router::RouterConfig;

/// What a scripted model does when called.
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Stream `chunks` after `delay_ms`, then complete.
    Succeed {
        delay_ms: u64,
        chunks: Vec<String>,
        finish_reason: String,
    },
    /// Fail with a classified error after `delay_ms`.
    FailWith { delay_ms: u64, kind: ErrorKind },
    /// Never answer; relies on cancellation or the wall budget.
    Hang,
}

impl Behavior {
    pub fn ok(output: &str) -> Self {
        Behavior::Succeed {
            delay_ms: 10,
            chunks: vec![output.to_string()],
            finish_reason: "end_turn".into(),
        }
    }

    pub fn ok_after(delay_ms: u64, output: &str) -> Self {
        Behavior::Succeed {
            delay_ms,
            chunks: vec![output.to_string()],
            finish_reason: "end_turn".into(),
        }
    }

    pub fn chunks(chunks: &[&str]) -> Self {
        Behavior::Succeed {
            delay_ms: 10,
            chunks: chunks.iter().map(|c| (*c).to_string()).collect(),
            finish_reason: "end_turn".into(),
        }
    }

    pub fn fail(kind: ErrorKind) -> Self {
        Behavior::FailWith { delay_ms: 10, kind }
    }
}

/// Build the `ProviderError` a scripted failure reports.
fn make_error(kind: ErrorKind) -> ProviderError {
    match kind {
        ErrorKind::Auth => ProviderError::Auth {
            message: "scripted auth failure".into(),
        },
        ErrorKind::RateLimit => ProviderError::RateLimited {
            retry_after_ms: 0,
            message: "scripted rate limit".into(),
        },
        ErrorKind::ContextOverflow => ProviderError::ContextOverflow {
            message: "scripted context overflow".into(),
        },
        ErrorKind::SafetyRefusal => ProviderError::SafetyRefusal {
            message: "scripted refusal".into(),
        },
        ErrorKind::Provider5xx => ProviderError::Api {
            status: 503,
            message: "scripted 503".into(),
        },
        ErrorKind::Timeout => ProviderError::Timeout,
        ErrorKind::Network => ProviderError::Network("scripted reset".into()),
        ErrorKind::InvalidModel => ProviderError::InvalidModel {
            model_id: "scripted".into(),
        },
        _ => ProviderError::Unknown("scripted".into()),
    }
}

/// Adapter whose behavior is scripted per model.
#[derive(Debug)]
pub struct ScriptedAdapter {
    id: &'static str,
    behaviors: Mutex<HashMap<String, Behavior>>,
    default: Behavior,
    calls: Mutex<Vec<GenerateCall>>,
}

impl ScriptedAdapter {
    pub fn new(id: &'static str, default: Behavior) -> Self {
        Self {
            id,
            behaviors: Mutex::new(HashMap::new()),
            default,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on_model(self, model_id: &str, behavior: Behavior) -> Self {
        let _ = self
            .behaviors
            .lock()
            .insert(model_id.to_string(), behavior);
        self
    }

    /// Every call this adapter has served, in order.
    pub fn call_log(&self) -> Vec<GenerateCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider_id(&self) -> &str {
        self.id
    }

    fn count_tokens(&self, text: &str, _model_id: &str) -> u64 {
        (text.len() as u64).div_ceil(4)
    }

    fn cost_usd(&self, _model_id: &str, tokens_in: u64, tokens_out: u64) -> f64 {
        (tokens_in as f64).mul_add(1e-6, tokens_out as f64 * 5e-6)
    }

    async fn open_stream(&self, call: &GenerateCall) -> ProviderResult<ProviderEventStream> {
        self.calls.lock().push(call.clone());
        let behavior = self
            .behaviors
            .lock()
            .get(&call.model_id)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        match behavior {
            Behavior::Succeed {
                delay_ms,
                chunks,
                finish_reason,
            } => {
                let prompt_tokens = self.count_tokens(&call.prompt, &call.model_id);
                Ok(Box::pin(async_stream::try_stream! {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    let mut out_len = 0u64;
                    for chunk in chunks {
                        out_len += chunk.len() as u64;
                        yield ProviderEvent::Delta(chunk);
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    yield ProviderEvent::Done {
                        tokens_in: prompt_tokens,
                        tokens_out: out_len.div_ceil(4),
                        finish_reason,
                    };
                }))
            }
            Behavior::FailWith { delay_ms, kind } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Err(make_error(kind))
            }
            Behavior::Hang => {
                // Far beyond any test budget; cancellation interrupts it.
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Timeout)
            }
        }
    }
}

/// A pipeline over two scripted adapters plus handles to them.
pub struct Harness {
    pub pipeline: RequestPipeline,
    pub anthropic: Arc<ScriptedAdapter>,
    pub openai: Arc<ScriptedAdapter>,
}

pub fn harness(anthropic: ScriptedAdapter, openai: ScriptedAdapter) -> Harness {
    let anthropic = Arc::new(anthropic);
    let openai = Arc::new(openai);
    let registry = Arc::new(
        ProviderRegistry::builder(Arc::new(ModelManifest::builtin()))
            .adapter(Arc::clone(&anthropic) as Arc<dyn ProviderAdapter>)
            .adapter(Arc::clone(&openai) as Arc<dyn ProviderAdapter>)
            .build(),
    );
    Harness {
        pipeline: RequestPipeline::new(registry, RouterConfig::default(), EngineConfig::default()),
        anthropic,
        openai,
    }
}

pub fn harness_ok() -> Harness {
    harness(
        ScriptedAdapter::new("anthropic", Behavior::ok("```rust\nfn answer() {}\n```")),
        ScriptedAdapter::new("openai", Behavior::ok("```python\ndef answer(): pass\n```")),
    )
}

/// Deserialize an execute payload from JSON.
pub fn payload(json: &str) -> quorum_core::request::ExecuteRequest {
    serde_json::from_str(json).unwrap()
}

/// Token events for one branch, concatenated.
pub fn tokens_for(events: &[ExecuteEvent], branch_id: &str) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            ExecuteEvent::Token { branch_id: b, text } if b.as_str() == branch_id => {
                Some(text.as_str())
            }
            _ => None,
        })
        .collect()
}

/// Count events of a given type.
pub fn count_events(events: &[ExecuteEvent], event_type: &str) -> usize {
    events
        .iter()
        .filter(|e| e.event_type() == event_type)
        .count()
}

/// Shared collecting sink as the dyn the pipeline wants.
pub fn collecting_sink() -> (Arc<CollectingSink>, Arc<dyn quorum_engine::EventSink>) {
    let sink = Arc::new(CollectingSink::new());
    let as_dyn: Arc<dyn quorum_engine::EventSink> = Arc::clone(&sink) as _;
    (sink, as_dyn)
}
