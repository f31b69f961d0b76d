//! OpenAI provider implementing the [`ProviderAdapter`] trait.
//!
//! Streams `/v1/chat/completions` with Bearer auth and
//! `stream_options.include_usage` so the final chunk carries token counts.

use async_stream::try_stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use metrics::counter;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error, instrument};

use quorum_core::retry::parse_retry_after_header;

use crate::adapter::{GenerateCall, ProviderAdapter, ProviderEvent, ProviderEventStream};
use crate::error::{ProviderError, ProviderResult, classify_api_error};
use crate::manifest::ModelManifest;
use crate::stats::{AdapterStats, StatsSnapshot};
use crate::tokens::estimate_tokens;

/// Default API endpoint.
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Adapter configuration.
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// Bearer token.
    pub api_key: String,
    /// Base URL override (tests point this at wiremock).
    pub base_url: Option<String>,
    /// Per-call timeout.
    pub timeout: std::time::Duration,
}

impl OpenAiConfig {
    /// Config with the production endpoint and a 120s call timeout.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout: std::time::Duration::from_secs(120),
        }
    }
}

/// Wire request body for `/v1/chat/completions`.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_completion_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    stream: bool,
    stream_options: Value,
}

/// One chat message.
#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

/// Relevant subset of a streamed chunk.
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Value,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// OpenAI LLM provider.
#[derive(Debug)]
pub struct OpenAiAdapter {
    config: OpenAiConfig,
    client: reqwest::Client,
    manifest: Arc<ModelManifest>,
    stats: AdapterStats,
}

impl OpenAiAdapter {
    /// Create a new adapter.
    #[must_use]
    pub fn new(config: OpenAiConfig, manifest: Arc<ModelManifest>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            manifest,
            stats: AdapterStats::new(),
        }
    }

    /// Runtime counters for health and metrics.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn build_headers(&self) -> ProviderResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth_value = format!("Bearer {}", self.config.api_key);
        let _ = headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value).map_err(|e| ProviderError::Auth {
                message: format!("invalid API key header: {e}"),
            })?,
        );
        Ok(headers)
    }

    fn build_request(&self, call: &GenerateCall) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &call.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: call.prompt.clone(),
        });
        ChatRequest {
            model: call.model_id.clone(),
            messages,
            max_completion_tokens: call.max_output_tokens,
            temperature: Some(call.temperature),
            top_p: call.top_p,
            stream: true,
            stream_options: json!({"include_usage": true}),
        }
    }

    /// Map an OpenAI finish reason to the unified vocabulary.
    fn map_finish_reason(reason: Option<&str>) -> &'static str {
        match reason {
            Some("length") => "max_tokens",
            Some("content_filter") => "content_filter",
            _ => "end_turn",
        }
    }

    /// Turn a raw SSE body stream into [`ProviderEvent`]s.
    fn into_event_stream(response: reqwest::Response) -> ProviderEventStream {
        let mut sse = response.bytes_stream().eventsource();
        Box::pin(try_stream! {
            let mut tokens_in = 0u64;
            let mut tokens_out = 0u64;
            let mut finish_reason: Option<String> = None;
            let mut done = false;

            while let Some(event) = sse.next().await {
                let event = event.map_err(|e| ProviderError::Network(e.to_string()))?;
                if event.data == "[DONE]" {
                    let reason = Self::map_finish_reason(finish_reason.as_deref());
                    if reason == "content_filter" {
                        Err(ProviderError::SafetyRefusal {
                            message: "output blocked by content filter".into(),
                        })?;
                    }
                    yield ProviderEvent::Done {
                        tokens_in,
                        tokens_out,
                        finish_reason: reason.to_string(),
                    };
                    done = true;
                    break;
                }

                let chunk: ChatChunk = serde_json::from_str(&event.data)?;
                if let Some(usage) = &chunk.usage {
                    tokens_in = usage.prompt_tokens;
                    tokens_out = usage.completion_tokens;
                }
                for choice in &chunk.choices {
                    if let Some(text) =
                        choice.delta.get("content").and_then(Value::as_str)
                    {
                        if !text.is_empty() {
                            yield ProviderEvent::Delta(text.to_string());
                        }
                    }
                    if let Some(reason) = &choice.finish_reason {
                        finish_reason = Some(reason.clone());
                    }
                }
            }

            // Upstream closed without the [DONE] sentinel.
            if !done {
                Err(ProviderError::Api {
                    status: 502,
                    message: "stream ended without [DONE]".into(),
                })?;
            }
        })
    }

    #[instrument(skip_all, fields(model = %call.model_id))]
    async fn open_stream_internal(&self, call: &GenerateCall) -> ProviderResult<ProviderEventStream> {
        let _ = self.manifest.resolve("openai", &call.model_id)?;

        let base_url = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{base_url}/v1/chat/completions");
        let headers = self.build_headers()?;
        let body = self.build_request(call);

        debug!(
            model = %body.model,
            max_completion_tokens = body.max_completion_tokens,
            message_count = body.messages.len(),
            "sending openai request"
        );

        self.stats.record_call();
        let response = self
            .client
            .post(&url)
            .headers(headers)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after_header);
            let body_text = response.text().await.unwrap_or_default();
            let err = classify_api_error(status.as_u16(), &body_text, retry_after);
            error!(
                status = status.as_u16(),
                kind = %err.kind(),
                "openai API error"
            );
            self.stats.record_error();
            counter!("provider_errors_total", "provider" => "openai").increment(1);
            return Err(err);
        }

        self.stats.record_success();
        Ok(Self::into_event_stream(response))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider_id(&self) -> &str {
        "openai"
    }

    fn count_tokens(&self, text: &str, model_id: &str) -> u64 {
        estimate_tokens(text, model_id)
    }

    fn cost_usd(&self, model_id: &str, tokens_in: u64, tokens_out: u64) -> f64 {
        self.manifest
            .estimate_cost(model_id, tokens_in, tokens_out)
            .unwrap_or(0.0)
    }

    #[instrument(skip_all, fields(provider = "openai", model = %call.model_id))]
    async fn open_stream(&self, call: &GenerateCall) -> ProviderResult<ProviderEventStream> {
        self.open_stream_internal(call).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
