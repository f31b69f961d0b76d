//! Route handlers.
//!
//! `POST /v1/execute` accepts the JSON body from the wire spec. The body is
//! deserialized strictly — unknown fields are a `BAD_REQUEST` — and the
//! response is either a single JSON document or an
//! `application/x-ndjson` event stream when `constraints.stream` is set.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use quorum_core::request::ExecuteRequest;
use quorum_engine::{ChannelSink, EventSink, NullSink};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::ApiError;
use crate::health::HealthResponse;
use crate::server::AppState;

/// `POST /v1/execute`
#[instrument(skip_all)]
pub async fn execute_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    // Strict intake: unknown fields and malformed JSON are a 400, wrapped
    // in the typed envelope rather than axum's default rejection.
    let payload: ExecuteRequest =
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?;

    if payload.constraints.stream {
        Ok(execute_streaming(state, payload))
    } else {
        execute_buffered(state, payload).await
    }
}

/// Buffered execution: one JSON document, status from the outcome.
async fn execute_buffered(state: AppState, payload: ExecuteRequest) -> Result<Response, ApiError> {
    let sink: Arc<dyn EventSink> = Arc::new(NullSink);
    let cancel = CancellationToken::new();
    let result = state
        .pipeline
        .execute(payload, sink, cancel)
        .await
        .map_err(|e| ApiError::from(&e))?;
    Ok(Json(result).into_response())
}

/// Streaming execution: NDJSON events, one JSON document per line.
///
/// The pipeline runs in its own task; the response body drains the event
/// channel. Dropping the body (client disconnect) cancels the request.
fn execute_streaming(state: AppState, payload: ExecuteRequest) -> Response {
    let (sink, mut rx) = ChannelSink::new();
    let sink: Arc<dyn EventSink> = Arc::new(sink);
    let cancel = CancellationToken::new();

    let pipeline = Arc::clone(&state.pipeline);
    let task_cancel = cancel.clone();
    let _task = tokio::spawn(async move {
        // The terminal event reaches the caller through the sink; the
        // returned value is already represented there.
        let _ = pipeline.execute(payload, sink, task_cancel).await;
    });

    let guard = CancelOnDrop(cancel);
    let body_stream = async_stream::stream! {
        let _guard = guard;
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            match serde_json::to_string(&event) {
                Ok(mut line) => {
                    line.push('\n');
                    yield Ok::<_, std::convert::Infallible>(Bytes::from(line));
                }
                Err(e) => {
                    debug!(error = %e, "failed to serialize stream event");
                }
            }
            if terminal {
                break;
            }
        }
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| Body::empty().into_response())
}

/// Cancels the in-flight request when the response body is dropped.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let health = HealthResponse::new(
        state.registry.is_healthy(),
        state.pipeline.active_count(),
        state.start_time.elapsed().as_secs(),
    );
    Json(health)
}

/// `GET /metrics` — Prometheus text format.
pub async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}
