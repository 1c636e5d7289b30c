//! git-mirror-manager - keeps local bare mirrors of git repositories
//!
//! Loads existing mirrors from disk, then serves the HTTP API for adding and
//! removing mirrors until interrupted.

mod http;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use gmm_core::fs::{FileSystem, LocalFileSystem};
use gmm_core::{CliOverrides, Config, MirrorManager};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Keep local mirrors of git repositories in sync with their remotes
#[derive(Parser, Debug)]
#[command(name = "git-mirror-manager")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Config file (defaults to ~/.config/git-mirror-manager/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding <namespace>/<repo> mirrors
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Default update schedule (cron expression, "@every <duration>" or "false")
    #[arg(long)]
    update_interval: Option<String>,

    /// Path to the git executable
    #[arg(long)]
    git_path: Option<String>,

    /// Maximum duration of a single git command, e.g. "10m"
    #[arg(long, value_parser = humantime::parse_duration)]
    git_timeout: Option<Duration>,

    /// Address to listen on
    #[arg(long)]
    listen: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let overrides = CliOverrides {
        base_dir: cli.base_dir.clone(),
        update_interval: cli.update_interval.clone(),
        git_path: cli.git_path.clone(),
        git_timeout: cli.git_timeout,
        addr: cli.listen.clone(),
    };
    let config = Config::load_with_overrides(cli.config.as_deref(), overrides)
        .context("failed to load configuration")?;

    tracing::info!(
        base_dir = %config.mirrors.base_dir.display(),
        update_interval = %config.mirrors.update_interval,
        git = %config.git.path,
        git_timeout = %humantime::format_duration(config.git.timeout),
        "Configuration loaded"
    );

    if cli.show_config {
        print_config(&config, cli.config.as_deref());
        return Ok(());
    }

    LocalFileSystem
        .create_dir_all(&config.mirrors.base_dir)
        .context("failed to create mirror base directory")?;

    let manager = Arc::new(MirrorManager::from_config(&config));
    manager
        .load_from_disk(&config.mirrors.base_dir)
        .await
        .context("failed to load mirrors from disk")?;

    let result = serve(manager.clone(), &config.server.addr).await;
    manager.shutdown().await;
    result
}

async fn serve(manager: Arc<MirrorManager>, addr: &str) -> anyhow::Result<()> {
    let app = http::create_router(manager);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", addr))?;

    tracing::info!(%addr, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutting down");
}

fn print_config(config: &Config, config_file: Option<&std::path::Path>) {
    println!("git-mirror-manager Configuration");
    println!("================================");
    println!();
    println!("Mirrors:");
    println!("  base_dir: {}", config.mirrors.base_dir.display());
    println!("  update_interval: {}", config.mirrors.update_interval);
    let mut overrides: Vec<_> = config.mirrors.overrides.iter().collect();
    overrides.sort();
    for (name, interval) in overrides {
        println!("  override {}: {}", name, interval);
    }
    println!();
    println!("Git:");
    println!("  path: {}", config.git.path);
    println!("  timeout: {}", humantime::format_duration(config.git.timeout));
    println!();
    println!("Server:");
    println!("  addr: {}", config.server.addr);
    println!();

    let path = config_file
        .map(|p| p.to_path_buf())
        .or_else(Config::default_config_path);
    if let Some(path) = path {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }
}
