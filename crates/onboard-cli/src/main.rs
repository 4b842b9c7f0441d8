//! `onboard`: runs onboarding batches and inspects agent manifests.

mod app;
mod config;

use app::{effective_manifests, read_drafts, App};
use clap::{Parser, Subcommand};
use config::OnboardConfig;
use onboard_registry::load_manifests;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "onboard", about = "Employee onboarding orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "onboard.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Onboard every employee in a JSON file and print a summary per workflow
    Run {
        /// JSON array of employee records
        #[arg(short, long)]
        input: PathBuf,
        /// Let account_setup call the scheduler directly
        #[arg(long)]
        direct_scheduling: bool,
    },
    /// List the effective agent manifests
    Agents,
    /// Validate a manifest file (.toml or .json)
    CheckManifest {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = OnboardConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Run {
            input,
            direct_scheduling,
        } => {
            let drafts = read_drafts(&input).await?;
            info!(employees = drafts.len(), input = %input.display(), "starting batch");

            let app = App::build(&config, direct_scheduling).await?;
            let summaries = app.run_batch(drafts).await?;
            let stats = app.orchestrator.stats().await?;
            app.shutdown().await;

            println!("{}", serde_json::to_string_pretty(&summaries)?);
            info!(
                completed = stats.completed,
                failed = stats.failed,
                success_rate = stats.success_rate,
                "batch finished"
            );
        }
        Commands::Agents => {
            let manifests = effective_manifests(&config);
            println!("{}", serde_json::to_string_pretty(&manifests)?);
        }
        Commands::CheckManifest { file } => {
            let manifests = load_manifests(&file)?;
            for manifest in &manifests {
                println!(
                    "ok: {} ({} methods, {:?})",
                    manifest.agent_id,
                    manifest.methods.len(),
                    manifest.transport.mode
                );
            }
        }
    }

    Ok(())
}
