//! Anthropic provider implementing the [`ProviderAdapter`] trait.
//!
//! Streams `/v1/messages` with `x-api-key` auth. Text-only requests; no
//! tool use, no extended thinking, no prompt caching.

use async_stream::try_stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use metrics::counter;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, instrument};

use quorum_core::retry::parse_retry_after_header;

use crate::adapter::{GenerateCall, ProviderAdapter, ProviderEvent, ProviderEventStream};
use crate::error::{ProviderError, ProviderResult, classify_api_error};
use crate::manifest::ModelManifest;
use crate::stats::{AdapterStats, StatsSnapshot};
use crate::tokens::estimate_tokens;

/// API version header value.
const API_VERSION: &str = "2023-06-01";

/// Default API endpoint.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Adapter configuration.
#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    /// API key for `x-api-key`.
    pub api_key: String,
    /// Base URL override (tests point this at wiremock).
    pub base_url: Option<String>,
    /// Per-call timeout.
    pub timeout: std::time::Duration,
}

impl AnthropicConfig {
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

/// Wire request body for `/v1/messages`.
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u64,
    messages: Vec<MessageParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    stream: bool,
}

/// One message in the request.
#[derive(Debug, Serialize)]
struct MessageParam {
    role: &'static str,
    content: String,
}

/// Relevant subset of the SSE event payloads.
#[derive(Debug, Deserialize)]
struct SseEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    usage: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Anthropic LLM provider.
#[derive(Debug)]
pub struct AnthropicAdapter {
    config: AnthropicConfig,
    client: reqwest::Client,
    manifest: Arc<ModelManifest>,
    stats: AdapterStats,
}

impl AnthropicAdapter {
    /// Create a new adapter.
    #[must_use]
    pub fn new(config: AnthropicConfig, manifest: Arc<ModelManifest>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            manifest,
            stats: AdapterStats::new(),
        }
    }

    /// Create an adapter sharing an HTTP client.
    #[must_use]
    pub fn with_client(
        config: AnthropicConfig,
        manifest: Arc<ModelManifest>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            config,
            client,
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
        let _ = headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        let _ = headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|e| ProviderError::Auth {
                message: format!("invalid API key header: {e}"),
            })?,
        );
        Ok(headers)
    }

    fn build_request(&self, call: &GenerateCall) -> MessagesRequest {
        MessagesRequest {
            model: call.model_id.clone(),
            max_tokens: call.max_output_tokens,
            messages: vec![MessageParam {
                role: "user",
                content: call.prompt.clone(),
            }],
            system: call.system_prompt.clone(),
            temperature: Some(call.temperature),
            top_p: call.top_p,
            stream: true,
        }
    }

    /// Map an Anthropic stop reason to the unified vocabulary.
    fn map_stop_reason(reason: Option<&str>) -> &'static str {
        match reason {
            Some("max_tokens") => "max_tokens",
            Some("refusal") => "refusal",
            _ => "end_turn",
        }
    }

    /// Turn a raw SSE body stream into [`ProviderEvent`]s.
    fn into_event_stream(response: reqwest::Response) -> ProviderEventStream {
        let mut sse = response.bytes_stream().eventsource();
        Box::pin(try_stream! {
            let mut tokens_in = 0u64;
            let mut tokens_out = 0u64;
            let mut stop_reason: Option<String> = None;

            while let Some(event) = sse.next().await {
                let event = event.map_err(|e| ProviderError::Network(e.to_string()))?;
                let envelope: SseEnvelope = serde_json::from_str(&event.data)?;
                match envelope.event_type.as_str() {
                    "message_start" => {
                        if let Some(usage) = envelope
                            .message
                            .as_ref()
                            .and_then(|m| m.get("usage"))
                        {
                            tokens_in = usage
                                .get("input_tokens")
                                .and_then(Value::as_u64)
                                .unwrap_or(0);
                        }
                    }
                    "content_block_delta" => {
                        if let Some(text) = envelope
                            .delta
                            .as_ref()
                            .filter(|d| d.get("type").and_then(Value::as_str) == Some("text_delta"))
                            .and_then(|d| d.get("text"))
                            .and_then(Value::as_str)
                        {
                            yield ProviderEvent::Delta(text.to_string());
                        }
                    }
                    "message_delta" => {
                        if let Some(delta) = envelope.delta.as_ref() {
                            if let Some(reason) =
                                delta.get("stop_reason").and_then(Value::as_str)
                            {
                                stop_reason = Some(reason.to_string());
                            }
                        }
                        if let Some(usage) = envelope.usage.as_ref() {
                            tokens_out = usage
                                .get("output_tokens")
                                .and_then(Value::as_u64)
                                .unwrap_or(tokens_out);
                        }
                    }
                    "message_stop" => {
                        let reason = Self::map_stop_reason(stop_reason.as_deref());
                        if reason == "refusal" {
                            Err(ProviderError::SafetyRefusal {
                                message: "model refused to answer".into(),
                            })?;
                        }
                        yield ProviderEvent::Done {
                            tokens_in,
                            tokens_out,
                            finish_reason: reason.to_string(),
                        };
                        break;
                    }
                    "error" => {
                        let message = envelope
                            .error
                            .as_ref()
                            .and_then(|e| e.get("message"))
                            .and_then(Value::as_str)
                            .unwrap_or("stream error")
                            .to_string();
                        Err(ProviderError::Api { status: 502, message })?;
                    }
                    // ping, content_block_start, content_block_stop
                    _ => {}
                }
            }
        })
    }

    #[instrument(skip_all, fields(model = %call.model_id))]
    async fn open_stream_internal(&self, call: &GenerateCall) -> ProviderResult<ProviderEventStream> {
        // Reject unknown models before spending an HTTP round trip.
        let _ = self.manifest.resolve("anthropic", &call.model_id)?;

        let base_url = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{base_url}/v1/messages");
        let headers = self.build_headers()?;
        let body = self.build_request(call);

        debug!(
            model = %body.model,
            max_tokens = body.max_tokens,
            has_system = body.system.is_some(),
            "sending anthropic request"
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
                "anthropic API error"
            );
            self.stats.record_error();
            counter!("provider_errors_total", "provider" => "anthropic").increment(1);
            return Err(err);
        }

        self.stats.record_success();
        Ok(Self::into_event_stream(response))
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    fn count_tokens(&self, text: &str, model_id: &str) -> u64 {
        estimate_tokens(text, model_id)
    }

    fn cost_usd(&self, model_id: &str, tokens_in: u64, tokens_out: u64) -> f64 {
        self.manifest
            .estimate_cost(model_id, tokens_in, tokens_out)
            .unwrap_or(0.0)
    }

    #[instrument(skip_all, fields(provider = "anthropic", model = %call.model_id))]
    async fn open_stream(&self, call: &GenerateCall) -> ProviderResult<ProviderEventStream> {
        self.open_stream_internal(call).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::NullDeltaSink;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter_for(server: &MockServer) -> AnthropicAdapter {
        let config = AnthropicConfig {
            api_key: "test-key".into(),
            base_url: Some(server.uri()),
            timeout: std::time::Duration::from_secs(5),
        };
        AnthropicAdapter::new(config, Arc::new(ModelManifest::builtin()))
    }

    fn call() -> GenerateCall {
        GenerateCall {
            model_id: "claude-sonnet-4-5".into(),
            system_prompt: Some("You are terse.".into()),
            prompt: "write fizzbuzz".into(),
            temperature: 0.3,
            top_p: None,
            max_output_tokens: 1024,
        }
    }

    fn sse_body() -> String {
        [
            r#"event: message_start
data: {"type":"message_start","message":{"usage":{"input_tokens":12}}}"#,
            r#"event: content_block_delta
data: {"type":"content_block_delta","delta":{"type":"text_delta","text":"fn "}}"#,
            r#"event: content_block_delta
data: {"type":"content_block_delta","delta":{"type":"text_delta","text":"fizzbuzz()"}}"#,
            r#"event: message_delta
data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":7}}"#,
            r#"event: message_stop
data: {"type":"message_stop"}"#,
        ]
        .join("\n\n")
            + "\n\n"
    }

    // ── Request building ────────────────────────────────────────────────

    #[test]
    fn headers_use_x_api_key() {
        let config = AnthropicConfig::new("secret");
        let adapter = AnthropicAdapter::new(config, Arc::new(ModelManifest::builtin()));
        let headers = adapter.build_headers().unwrap();
        assert_eq!(headers["x-api-key"], "secret");
        assert_eq!(headers["anthropic-version"], API_VERSION);
        assert!(headers.get("authorization").is_none());
    }

    #[test]
    fn request_body_shape() {
        let config = AnthropicConfig::new("k");
        let adapter = AnthropicAdapter::new(config, Arc::new(ModelManifest::builtin()));
        let body = adapter.build_request(&call());
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "claude-sonnet-4-5");
        assert_eq!(json["stream"], true);
        assert_eq!(json["system"], "You are terse.");
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("top_p").is_none());
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(AnthropicAdapter::map_stop_reason(Some("end_turn")), "end_turn");
        assert_eq!(
            AnthropicAdapter::map_stop_reason(Some("max_tokens")),
            "max_tokens"
        );
        assert_eq!(AnthropicAdapter::map_stop_reason(None), "end_turn");
        assert_eq!(
            AnthropicAdapter::map_stop_reason(Some("stop_sequence")),
            "end_turn"
        );
    }

    // ── Wire tests ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn generate_parses_sse_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body()),
            )
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let generation = adapter
            .generate(&call(), &NullDeltaSink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(generation.final_output, "fn fizzbuzz()");
        assert_eq!(generation.tokens_in, 12);
        assert_eq!(generation.tokens_out, 7);
        assert_eq!(generation.finish_reason, "end_turn");
        assert!(generation.cost_usd > 0.0);
    }

    #[tokio::test]
    async fn auth_error_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_string(
                r#"{"error":{"message":"invalid x-api-key"}}"#,
            ))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let err = adapter
            .generate(&call(), &NullDeltaSink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), quorum_core::errors::ErrorKind::Auth);
        assert_eq!(adapter.stats().errors, 1);
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "2")
                    .set_body_string(r#"{"error":{"message":"overloaded"}}"#),
            )
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let err = adapter
            .generate(&call(), &NullDeltaSink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), quorum_core::errors::ErrorKind::RateLimit);
        assert_eq!(err.retry_after_ms(), Some(2000));
    }

    #[tokio::test]
    async fn unknown_model_rejected_before_http() {
        let server = MockServer::start().await;
        let adapter = adapter_for(&server);
        let mut bad_call = call();
        bad_call.model_id = "claude-99".into();

        let err = adapter
            .generate(&bad_call, &NullDeltaSink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), quorum_core::errors::ErrorKind::InvalidModel);
        // No HTTP call was made.
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
