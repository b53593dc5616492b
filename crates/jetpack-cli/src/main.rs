use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use jetpack_core::{Orchestrator, Settings};
use jetpack_store::Layout;

#[derive(Parser)]
#[command(name = "jetpack", about = "Coordination kernel for a fleet of autonomous coding agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a work directory: on-disk layout plus a default settings.json
    Init {
        /// Work directory to initialize (defaults to the current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,
        /// Overwrite an existing settings.json
        #[arg(long)]
        force: bool,
    },
    /// Start the orchestrator against an initialized work directory
    Run {
        /// Work directory to run against (defaults to the current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,
        /// Model adapter provider (claude-code, codex, gemini, mock)
        #[arg(long, default_value = "claude-code")]
        provider: String,
        /// Override the adapter's CLI binary path
        #[arg(long)]
        binary: Option<String>,
        /// Override settings.json's agent count for this run
        #[arg(long)]
        agents: Option<u32>,
    },
}

fn cmd_init(path: &std::path::Path, force: bool) -> Result<()> {
    let layout = Layout::new(path);
    layout
        .ensure_dirs()
        .with_context(|| format!("failed to create work directory layout at {}", path.display()))?;

    let settings_file = layout.settings_file();
    if settings_file.exists() && !force {
        anyhow::bail!(
            "settings file already exists at {}\nUse --force to overwrite.",
            settings_file.display()
        );
    }

    Settings::default()
        .save(path)
        .with_context(|| format!("failed to write {}", settings_file.display()))?;

    println!("Initialized work directory at {}", path.display());
    println!("  settings: {}", settings_file.display());
    println!("  tasks:    {}", layout.tasks_jsonl().display());
    println!();
    println!("Next: run `jetpack run --path {}`.", path.display());
    Ok(())
}

async fn cmd_run(path: PathBuf, provider: String, binary: Option<String>, agents: Option<u32>) -> Result<()> {
    let mut settings = Settings::load(&path).with_context(|| {
        format!("failed to load settings for {} (run `jetpack init` first)", path.display())
    })?;
    if let Some(agents) = agents {
        settings.default_count = agents;
    }

    let orchestrator = Arc::new(
        Orchestrator::open(path.clone(), settings, provider.as_str(), binary)
            .with_context(|| format!("failed to open work directory {}", path.display()))?,
    );

    tracing::info!(work_dir = %path.display(), provider = %provider, "starting orchestrator");
    orchestrator.start().await.context("failed to start agent fleet")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            tracing::info!("shutdown requested, draining in-flight work");
        }
        _ = orchestrator.wait_for_runtime_shutdown() => {
            tracing::info!("runtime.mode ended the main loop, draining in-flight work");
        }
    }

    orchestrator.stop().await.context("failed to stop agent fleet cleanly")?;
    tracing::info!("orchestrator stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force)?,
        Commands::Run { path, provider, binary, agents } => cmd_run(path, provider, binary, agents).await?,
    }
    Ok(())
}
