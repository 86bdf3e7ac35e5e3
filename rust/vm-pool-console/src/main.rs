//! VM Pool Console - Main Entry Point
//!
//! Web console for browsing VM resource pools and queueing VM actions.

use clap::Parser;
use mimalloc::MiMalloc;

use vm_pool_console::config::AppConfig;
use vm_pool_console::logging::init_tracing;
use vm_pool_console::server::create_app;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line arguments. Each one overrides the matching config value.
#[derive(Parser, Debug)]
#[command(name = "vm-pool-console")]
#[command(about = "VM Pool Console - web controller for virtual machine resource pools")]
#[command(version)]
struct Args {
    /// Host to bind to.
    #[arg(long, env = "VM_POOL_CONSOLE_HOST")]
    host: Option<String>,

    /// Port to listen on.
    #[arg(short, long, env = "VM_POOL_CONSOLE_PORT")]
    port: Option<u16>,

    /// Log level.
    #[arg(long)]
    log_level: Option<String>,

    /// Config file path.
    #[arg(short, long, env = "VM_POOL_CONSOLE_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load_with_file(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging);
    tracing::info!("Starting VM Pool Console v{}", env!("CARGO_PKG_VERSION"));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = create_app(config, None).await?;
    tracing::info!("Application initialized");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}
