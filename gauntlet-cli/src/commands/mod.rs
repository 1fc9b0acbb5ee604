//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod endpoints;
mod manifest;

pub use endpoints::EndpointCommands;
pub use manifest::ManifestCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Deployed test endpoints
    Endpoints {
        #[command(subcommand)]
        command: EndpointCommands,
    },
    /// Manifest files
    Manifest {
        #[command(subcommand)]
        command: ManifestCommands,
    },
}

/// Routes the command to the appropriate handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Endpoints { command } => endpoints::handle_endpoint_command(command, config).await,
        Commands::Manifest { command } => manifest::handle_manifest_command(command),
    }
}
