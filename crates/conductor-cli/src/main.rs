mod cleanup_cmd;
mod config;
mod plan_file;
mod run_cmd;
mod waves_cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use config::{load_config, ConductorConfig};

/// Process exit codes.
pub mod exit_codes {
    /// Every task finished GREEN.
    pub const ALL_GREEN: i32 = 0;
    /// At least one task ended YELLOW, RED, or FAILED (or the run was
    /// cancelled).
    pub const ANY_NON_GREEN: i32 = 1;
    /// The plan failed scheduling validation; nothing executed.
    pub const SCHEDULING_ERROR: i32 = 2;
    /// An unrecoverable external failure (e.g. git unavailable for the
    /// branch guard).
    pub const EXTERNAL_FAILURE: i32 = 3;
}

#[derive(Parser)]
#[command(name = "conductor", about = "Wave-scheduled orchestrator for AI coding agents")]
struct Cli {
    /// Config file path (overrides CONDUCTOR_CONFIG and the default
    /// ~/.config/conductor/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan document
    Run {
        /// Path to the plan JSON document
        plan: PathBuf,
        /// Working directory for agents, git, and checks
        #[arg(long, default_value = ".")]
        working_dir: PathBuf,
        /// Override the configured retry limit
        #[arg(long)]
        max_retries: Option<u32>,
        /// Override the configured agent command
        #[arg(long)]
        agent_cmd: Option<String>,
    },
    /// Show the wave schedule for a plan without executing it
    Waves {
        /// Path to the plan JSON document
        plan: PathBuf,
    },
    /// Validate a plan's scheduling constraints
    Validate {
        /// Path to the plan JSON document
        plan: PathBuf,
    },
    /// Delete stale checkpoint branches
    Cleanup {
        /// Working directory containing the git repository
        #[arg(long, default_value = ".")]
        working_dir: PathBuf,
        /// Override the configured retention window in days
        #[arg(long)]
        keep_days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConductorConfig::resolve(load_config(cli.config.as_ref())?)?;

    // Ctrl-C cancels the whole run; in-flight work drains.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            signal_cancel.cancel();
        }
    });

    let code = match cli.command {
        Commands::Run {
            plan,
            working_dir,
            max_retries,
            agent_cmd,
        } => {
            run_cmd::run(
                run_cmd::RunArgs {
                    plan_path: plan,
                    working_dir,
                    max_retries,
                    agent_command: agent_cmd,
                },
                config,
                cancel,
            )
            .await?
        }
        Commands::Waves { plan } => waves_cmd::waves(&plan)?,
        Commands::Validate { plan } => waves_cmd::validate(&plan)?,
        Commands::Cleanup {
            working_dir,
            keep_days,
        } => cleanup_cmd::cleanup(working_dir, keep_days, config, cancel).await?,
    };

    std::process::exit(code);
}
