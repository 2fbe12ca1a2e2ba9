mod commands;
mod config;

use clap::{Parser, Subcommand};
use config::ConclaveConfig;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conclave", about = "Conclave: architect/developer/reviewer agent workflows")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conclave.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full workflow, replaying agent responses from a script
    Run {
        /// Free-text requirements file
        #[arg(short, long)]
        requirements: PathBuf,
        /// JSON replay script with per-role steps
        #[arg(short, long)]
        script: PathBuf,
        /// Output directory (overrides config)
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Rejections allowed per task (overrides config)
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Ask the architect to accept each approved task
        #[arg(long)]
        acceptance_gate: bool,
    },
    /// Merge saved agent responses into one consensus report
    Consensus {
        /// Response files (JSON)
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the per-role pricing table
    Pricing,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            requirements,
            script,
            data_dir,
            max_iterations,
            acceptance_gate,
        } => {
            let mut config = ConclaveConfig::load(&cli.config).await?;
            config.apply_env();
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            if let Some(n) = max_iterations {
                config.workflow.max_iterations = n;
            }
            if acceptance_gate {
                config.workflow.acceptance_gate = true;
            }

            info!(project = %config.project_id, "Starting conclave run");
            let summary = commands::run(&config, &requirements, &script).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Consensus { files, output } => {
            let report = commands::consensus(&files).await?;
            let json = serde_json::to_string_pretty(&report)?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, json).await?;
                    info!(path = %path.display(), "Consensus report written");
                }
                None => println!("{json}"),
            }
        }
        Commands::Pricing => {
            let config = ConclaveConfig::load(&cli.config).await?;
            for row in commands::pricing(&config)? {
                println!("{row}");
            }
        }
    }

    Ok(())
}
