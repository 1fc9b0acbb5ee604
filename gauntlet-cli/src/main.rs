//! Gauntlet CLI
//!
//! Operator commands for the integration-test harness: inspect and purge the
//! endpoints test runs leave deployed, and read manifest files.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "gauntlet")]
#[command(about = "Gauntlet integration-test harness CLI", long_about = None)]
struct Cli {
    /// Project the test endpoints are deployed to
    #[arg(long, env = "PROJECT_ID")]
    project: Option<String>,

    /// Deploy tool used to list and delete endpoints
    #[arg(long, env = "DEPLOY_TOOL", default_value = "firebase")]
    tool: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        project: cli.project,
        tool: cli.tool,
    };

    handle_command(cli.command, &config).await
}
