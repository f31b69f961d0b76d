//! quorumd — the Quorum orchestration server.
//!
//! Wires the provider registry, router, engine pipeline, and HTTP server
//! together and runs until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use quorum_engine::{EngineConfig, RequestPipeline};
use quorum_providers::anthropic::{AnthropicAdapter, AnthropicConfig};
use quorum_providers::openai::{OpenAiAdapter, OpenAiConfig};
use quorum_providers::{ModelManifest, ProviderRegistry};
use quorum_router::RouterConfig;
use quorum_server::{QuorumServer, ServerConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Command-line options.
#[derive(Debug, Parser)]
#[command(name = "quorumd", about = "Multi-agent orchestration server")]
struct Args {
    /// Bind host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Bind port.
    #[arg(long, default_value_t = 8420)]
    port: u16,

    /// Path to a model manifest file (defaults to the compiled-in catalog).
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Hard cap on speculative branches per request.
    #[arg(long, default_value_t = 5)]
    max_branches: usize,

    /// Anthropic API key.
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_api_key: Option<String>,

    /// OpenAI API key.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("QUORUM_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_registry(args: &Args) -> anyhow::Result<Arc<ProviderRegistry>> {
    let manifest = match &args.manifest {
        Some(path) => Arc::new(
            ModelManifest::from_file(path)
                .with_context(|| format!("loading manifest from {}", path.display()))?,
        ),
        None => Arc::new(ModelManifest::builtin()),
    };

    let mut builder = ProviderRegistry::builder(Arc::clone(&manifest));
    if let Some(key) = &args.anthropic_api_key {
        builder = builder.adapter(Arc::new(AnthropicAdapter::new(
            AnthropicConfig::new(key.clone()),
            Arc::clone(&manifest),
        )));
    } else {
        warn!("ANTHROPIC_API_KEY not set; anthropic provider disabled");
    }
    if let Some(key) = &args.openai_api_key {
        builder = builder.adapter(Arc::new(OpenAiAdapter::new(
            OpenAiConfig::new(key.clone()),
            Arc::clone(&manifest),
        )));
    } else {
        warn!("OPENAI_API_KEY not set; openai provider disabled");
    }

    let registry = builder.build();
    anyhow::ensure!(
        registry.is_healthy(),
        "no providers configured; set at least one API key"
    );
    Ok(Arc::new(registry))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("installing metrics recorder")?;

    let registry = build_registry(&args)?;

    let router_config = RouterConfig {
        max_branches: args.max_branches,
        ..Default::default()
    };
    let engine_config = EngineConfig {
        max_branches: args.max_branches,
        ..Default::default()
    };
    let pipeline = Arc::new(RequestPipeline::new(
        Arc::clone(&registry),
        router_config,
        engine_config,
    ));

    let server_config = ServerConfig {
        host: args.host.clone(),
        port: args.port,
        ..Default::default()
    };
    let server = QuorumServer::new(server_config, pipeline, registry, metrics_handle);
    let (addr, handle) = server.listen().await.context("binding server")?;
    info!(%addr, "quorumd ready");

    let shutdown = server.shutdown_token();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT received; shutting down");
        }
        () = wait_for_sigterm() => {
            info!("SIGTERM received; shutting down");
        }
    }
    shutdown.cancel();
    let _ = handle.await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            let _ = stream.recv().await;
        }
        Err(_) => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending().await;
}
