//! Manifest command handlers

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use gauntlet_core::{Manifest, RunId};

/// Manifest subcommands
#[derive(Subcommand)]
pub enum ManifestCommands {
    /// Print the endpoints of a manifest file
    Show {
        /// Path to functions.yaml
        path: PathBuf,

        /// Print each endpoint's attributes
        #[arg(long)]
        verbose: bool,
    },
}

/// Handle manifest commands
pub fn handle_manifest_command(command: ManifestCommands) -> Result<()> {
    match command {
        ManifestCommands::Show { path, verbose } => show_manifest(&path, verbose),
    }
}

fn show_manifest(path: &std::path::Path, verbose: bool) -> Result<()> {
    let manifest =
        Manifest::load(path).with_context(|| format!("Failed to read {}", path.display()))?;

    println!("{}", format!("Manifest: {}", path.display()).bold());
    println!("  Spec version: {}", manifest.spec_version.cyan());
    println!("  Endpoints:    {}", manifest.endpoints.len());
    println!();

    for (name, config) in &manifest.endpoints {
        let run = RunId::from_endpoint_name(name)
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  {} {} {}", "▸".cyan(), name.bold(), format!("({})", run).dimmed());

        if verbose {
            for (key, value) in config {
                println!("      {}: {}", key, value);
            }
        }
    }

    Ok(())
}
