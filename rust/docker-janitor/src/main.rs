//! docker-janitor - Main Entry Point
//!
//! Runs the abandoned resource cleaner on its configured schedule until
//! Ctrl+C or SIGTERM, or once with `--once`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use mimalloc::MiMalloc;

use docker_janitor::config::{ConfigValidator, JanitorConfig};
use docker_janitor::{Janitor, TaskLauncher, log_banner, logging};

// Use mimalloc for better performance
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "docker-janitor")]
#[command(about = "Removes abandoned workspace containers and networks")]
#[command(version)]
struct Args {
    /// Config file path.
    #[arg(short, long, env = "JANITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Log level, overrides `logging.level`.
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (`pretty` or `json`), overrides `logging.format`.
    #[arg(long)]
    log_format: Option<String>,

    /// Run one cleanup pass, print the report and exit.
    #[arg(long)]
    once: bool,

    /// Log abandoned resources without removing them.
    #[arg(long)]
    dry_run: bool,

    /// Seconds to wait for running tasks on shutdown before aborting them.
    #[arg(long, default_value = "30")]
    shutdown_timeout: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = JanitorConfig::load_unchecked(args.config.as_deref())?;
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    if let Some(format) = &args.log_format {
        config.logging.format.clone_from(format);
    }
    if args.dry_run {
        config.cleaner.dry_run = true;
    }
    ConfigValidator::validate(&config)
        .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;

    logging::init_tracing(&config.logging.level, &config.logging.format)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.launcher.worker_threads)
        .thread_name("janitor-worker")
        .enable_all()
        .build()?;

    runtime.block_on(run(&args, &config))
}

async fn run(args: &Args, config: &JanitorConfig) -> anyhow::Result<()> {
    log_banner!(
        format!("docker-janitor v{}", env!("CARGO_PKG_VERSION")),
        format!(
            "workers={} dry_run={}",
            config.launcher.worker_threads, config.cleaner.dry_run
        )
    );

    let janitor = Janitor::from_config(config)?;
    match janitor.preflight().await {
        Ok(containers) => tracing::info!(containers, "Container runtime reachable"),
        Err(e) => tracing::warn!(error = %e, "Container runtime is not reachable yet"),
    }

    if args.once {
        let report = janitor.run_once().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if report.failed_passes > 0 {
            anyhow::bail!("{} cleanup pass(es) failed", report.failed_passes);
        }
        return Ok(());
    }

    let launcher = TaskLauncher::new();
    let handles = janitor.start(&launcher)?;
    tracing::info!(tasks = handles.len(), "Janitor started");

    shutdown_signal().await;

    launcher.shutdown();
    if !launcher
        .await_termination(Duration::from_secs(args.shutdown_timeout))
        .await
    {
        tracing::warn!("Tasks still running after shutdown timeout, aborting");
        launcher.shutdown_now();
    }

    tracing::info!("Janitor shut down gracefully");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
