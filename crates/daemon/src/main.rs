//! PodShell Gateway
//!
//! Browser terminals and log tails for Kubernetes pods.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use podshell::config::{default_config_path, Config};
use podshell::orchestrator::Orchestrator;
use podshell::registry::{ClusterRegistry, KubeconfigLoader};
use tracing_subscriber::EnvFilter;

/// PodShell Gateway - browser terminals and log tails for Kubernetes pods.
#[derive(Parser, Debug)]
#[command(name = "podshell")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the gateway.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the gateway until SIGINT or SIGTERM
    Serve {
        /// Listen address, overriding the config file
        #[arg(long, value_name = "ADDR")]
        addr: Option<String>,
    },

    /// Load the kubeconfig directory once and report the result
    Clusters,

    /// Print the effective configuration as TOML
    Config {
        /// Save it to the config file instead of printing it
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    if let Commands::Serve { addr: Some(addr) } = &cli.command {
        config.server.listen_addr = addr.clone();
    }

    // Initialize tracing
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.server.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
    }

    // Validate configuration
    config.validate()?;

    // kube's rustls backend needs a process-wide crypto provider
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    match cli.command {
        Commands::Serve { .. } => run_server(config).await?,
        Commands::Clusters => list_clusters(&config).await?,
        Commands::Config { write } => show_config(&config, cli.config.as_deref(), write)?,
    }

    Ok(())
}

/// Run the gateway until a shutdown signal arrives.
async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("PodShell gateway starting...");

    let mut orchestrator = Orchestrator::new(config)?;
    orchestrator.start().await?;

    // Wait for shutdown signal (SIGTERM or SIGINT)
    wait_for_shutdown_signal().await?;
    tracing::info!("Received shutdown signal");

    orchestrator.stop().await?;

    Ok(())
}

/// Scan the kubeconfig directory once and print what loaded.
async fn list_clusters(config: &Config) -> anyhow::Result<()> {
    let registry = ClusterRegistry::new(
        config.registry.kubeconfig_dir.clone(),
        Arc::new(KubeconfigLoader),
    );
    let report = registry.refresh().await;

    println!("Kubeconfig directory: {}", registry.dir().display());
    if report.loaded.is_empty() && report.failed.is_empty() {
        println!("No clusters found.");
        return Ok(());
    }

    for name in &report.loaded {
        println!("  {:<24} loaded", name);
    }
    for (name, reason) in &report.failed {
        println!("  {:<24} failed: {}", name, reason);
    }
    println!();
    println!(
        "Total: {} loaded, {} failed",
        report.loaded.len(),
        report.failed.len()
    );

    Ok(())
}

/// Print the effective configuration, or save it to `path` (the default
/// config path when unset) with `--write`.
fn show_config(config: &Config, path: Option<&Path>, write: bool) -> anyhow::Result<()> {
    if !write {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let path = path.map_or_else(default_config_path, Path::to_path_buf);
    config.save(&path)?;
    println!("Configuration written to {}", path.display());
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")
}
