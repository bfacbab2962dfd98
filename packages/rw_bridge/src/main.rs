use anyhow::{Context, Result};
use axum::{Router, routing::get};
use backend_link::BackendPool;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod cli;
mod config;
mod error;
mod handlers;
mod metrics;
mod ws;

#[cfg(test)]
mod test_helpers;

use crate::config::{BridgeConfig, FileConfig, RuntimeOverrides};
use crate::metrics::ServerMetrics;
use crate::ws::{Broadcaster, SessionRegistry};

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "rw-bridge")]
#[command(about = "WebSocket bridge to a reader/writer TCP message backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge server in the foreground (default)
    Serve(ServeArgs),

    /// Talk to a running bridge from the terminal
    Client(cli::ClientArgs),
}

#[derive(Parser, Default)]
struct ServeArgs {
    /// Config file (defaults to ./rw-bridge.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the WebSocket server
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend address as host:port
    #[arg(long)]
    backend: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Application state shared across handlers
#[derive(Clone)]
pub(crate) struct AppState {
    pub config: Arc<BridgeConfig>,
    /// Gate for all blocking backend I/O
    pub pool: BackendPool,
    /// Active writer leases
    pub registry: Arc<SessionRegistry>,
    /// Every connected front end
    pub broadcaster: Arc<Broadcaster>,
    pub metrics: Arc<ServerMetrics>,
}

impl AppState {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            pool: BackendPool::new(config.backend.clone()),
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
            broadcaster: Arc::new(Broadcaster::new()),
            metrics: Arc::new(ServerMetrics::new()),
        }
    }
}

/// All HTTP and WebSocket routes
pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::websocket_handler))
        .route("/ws", get(handlers::websocket_handler))
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => run_server(ServeArgs::default()).await,
        Some(Commands::Serve(args)) => run_server(args).await,
        Some(Commands::Client(args)) => cli::client_command(args).await,
    }
}

async fn run_server(args: ServeArgs) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "rw_bridge=debug,backend_link=debug,tower_http=debug,info"
    } else {
        "rw_bridge=info,backend_link=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_FILE));
    let file_config: FileConfig = config::load_config(&config_path)
        .extract()
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let overrides = RuntimeOverrides {
        host: args.host,
        port: args.port,
        backend: args.backend,
    };
    let bridge_config = BridgeConfig::from_file(&file_config).with_overrides(&overrides);
    let addr = bridge_config.listen_addr();

    info!(
        backend = %bridge_config.backend.addr,
        lease_idle_timeout = ?bridge_config.session.lease_idle_timeout,
        "Starting rw-bridge"
    );

    let state = AppState::new(bridge_config);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on ws://{}", listener.local_addr()?);

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
