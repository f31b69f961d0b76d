//! `QuorumServer` — the axum HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use quorum_engine::RequestPipeline;
use quorum_providers::ProviderRegistry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tracing::{info, instrument};

use crate::config::ServerConfig;
use crate::routes::{execute_handler, health_handler, metrics_handler};

/// Generates UUIDv7 request IDs for the `x-request-id` header.
#[derive(Clone)]
struct UuidV7RequestId;

impl MakeRequestId for UuidV7RequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::now_v7().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Shared state accessible from handlers.
#[derive(Clone)]
pub struct AppState {
    /// The engine pipeline.
    pub pipeline: Arc<RequestPipeline>,
    /// Provider registry, for health reporting.
    pub registry: Arc<ProviderRegistry>,
    /// Prometheus metrics handle for rendering.
    pub metrics_handle: Arc<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
}

/// The main Quorum server.
pub struct QuorumServer {
    config: ServerConfig,
    state: AppState,
    shutdown: CancellationToken,
}

impl QuorumServer {
    /// Create a new server.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        pipeline: Arc<RequestPipeline>,
        registry: Arc<ProviderRegistry>,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        Self {
            config,
            state: AppState {
                pipeline,
                registry,
                metrics_handle: Arc::new(metrics_handle),
                start_time: Instant::now(),
            },
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the axum router with all routes and middleware.
    #[must_use]
    pub fn router(&self) -> Router {
        // No timeout layer: streaming responses outlive any fixed request
        // timeout; the engine enforces its own wall budgets.
        Router::new()
            .route("/v1/execute", post(execute_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            // Outermost layers execute first on request, last on response.
            .layer(CatchPanicLayer::new())
            .layer(RequestBodyLimitLayer::new(self.config.max_body_bytes))
            .layer(SetRequestIdLayer::x_request_id(UuidV7RequestId))
            .layer(PropagateRequestIdLayer::x_request_id())
    }

    /// Bind and serve. Returns the bound address and the server task.
    #[instrument(skip_all, fields(host = %self.config.host, port = self.config.port))]
    pub async fn listen(
        &self,
    ) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "server started");

        let router = self.router();
        let shutdown_token = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    info!("server shutdown initiated");
                })
                .await;
            info!("server shutdown complete");
        });

        Ok((bound_addr, handle))
    }

    /// The shutdown token; cancelling it drains the server.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The shared state (tests build requests against the router directly).
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
