//! nimbus command-line entry point.

mod commands;
mod config;
mod progress;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nimbus", version, about = "Resilient client for cloud file storage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file, resuming a prior interrupted transfer.
    Upload {
        /// Local file to send.
        local: PathBuf,
        /// Destination path on the storage service.
        remote: String,
        /// Discard any pending checkpoint and start over.
        #[arg(long)]
        restart: bool,
    },
    /// Watch a server-side job until it reaches a terminal state.
    Watch {
        /// Job status URL returned when the operation was started.
        job_url: String,
    },
    /// Show the pending checkpoint for a (local, remote) pair.
    ResumeInfo {
        local: PathBuf,
        remote: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::Config::load()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli.command, config))
}

async fn run(command: Commands, config: config::Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping at the next safe point");
                cancel.cancel();
            }
        });
    }

    match command {
        Commands::Upload {
            local,
            remote,
            restart,
        } => commands::upload(&config, cancel, &local, &remote, restart).await,
        Commands::Watch { job_url } => commands::watch(&config, cancel, &job_url).await,
        Commands::ResumeInfo { local, remote } => commands::resume_info(&config, &local, &remote),
    }
}
