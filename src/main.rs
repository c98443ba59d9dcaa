use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

use claude_log_proxy::commands;
use claude_log_proxy::config::{self, Config};
use claude_log_proxy::error::Result;
use claude_log_proxy::proxy::ProxyServer;
use claude_log_proxy::state::{audit_logger_from_config, AppState};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "claude-log-proxy")]
#[command(about = "Transparent Anthropic API proxy with an audit log of every exchange", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (YAML/JSON/TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit operational logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Listen port (overrides PROXY_PORT)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Audit log directory (overrides LOG_DIR)
    #[arg(long, value_name = "DIR", global = true)]
    log_dir: Option<PathBuf>,

    /// Upstream API base URL (overrides ANTHROPIC_API_BASE)
    #[arg(long, value_name = "URL", global = true)]
    upstream: Option<String>,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the proxy server (default)
    Run,
    /// Validate configuration and check the log directory is writable
    Check,
}

impl Args {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.proxy_port = port;
        }
        if let Some(log_dir) = &self.log_dir {
            config.log_dir = log_dir.clone();
        }
        if let Some(upstream) = &self.upstream {
            config.anthropic_api_base = upstream.clone();
        }
    }
}

fn init_tracing(debug: bool, json: bool) {
    let log_level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("claude_log_proxy={log_level}")));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug, args.json_logs);

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            config::load_from_path(path).await.map_err(|e| {
                error!(
                    "Failed to load configuration from {}: {}",
                    path.display(),
                    e
                );
                e
            })?
        }
        None => config::load_from_env_or_file().await.map_err(|e| {
            error!("Failed to load configuration: {}", e);
            e
        })?,
    };
    args.apply_overrides(&mut config);

    match args.command.unwrap_or(Command::Run) {
        Command::Check => commands::run_config_check(config).await,
        Command::Run => run(config).await,
    }
}

async fn run(config: Config) -> Result<()> {
    config::validate(&config)?;

    info!("Starting Claude Log Proxy");
    info!("Forwarding to {}", config.anthropic_api_base);
    info!("Proxy will listen on {}", config.bind_address());
    info!("Audit logs in {}", config.log_dir.display());

    let audit = Arc::new(audit_logger_from_config(&config).await);
    if !audit.has_archiver() {
        info!("S3_BUCKET not set, log archival disabled");
    }
    let (state, _shutdown_rx) = AppState::new(config, audit.clone())?;

    audit.start().await;

    let proxy_server = ProxyServer::new(state.clone());
    let mut proxy_handle = tokio::spawn(async move {
        if let Err(e) = proxy_server.run().await {
            error!("Proxy server error: {}", e);
        }
    });

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = &mut proxy_handle => {
            warn!("Proxy server exited");
        }
    }

    info!("Shutting down Claude Log Proxy");
    state.shutdown();

    let drained = tokio::time::timeout(tokio::time::Duration::from_secs(30), async {
        let _ = proxy_handle.await;
    })
    .await;
    if drained.is_err() {
        error!("Shutdown timeout exceeded, in-flight requests abandoned");
    }

    // Flush whatever the server enqueued before it stopped.
    audit.stop().await;
    info!("Graceful shutdown completed");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
