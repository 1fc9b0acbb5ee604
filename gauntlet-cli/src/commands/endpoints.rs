//! Endpoint command handlers
//!
//! Lists endpoints left deployed by test runs and purges leaked runs.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use gauntlet_client::{DeployClient, EndpointFilter, ToolDeployClient};
use gauntlet_core::RunId;
use gauntlet_runner::service::delete_run_endpoints;

use crate::config::Config;

/// Endpoint subcommands
#[derive(Subcommand)]
pub enum EndpointCommands {
    /// List deployed endpoints that belong to test runs
    List {
        /// Only show endpoints of this run
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Delete every deployed endpoint of a run
    Purge {
        /// Run identifier, e.g. t1700000000000
        run_id: String,
    },
}

/// Handle endpoint commands
pub async fn handle_endpoint_command(command: EndpointCommands, config: &Config) -> Result<()> {
    let project = config.require_project()?;
    let client = ToolDeployClient::new(config.tool.clone());

    match command {
        EndpointCommands::List { run_id } => {
            let run_id = run_id.as_deref().map(RunId::parse).transpose()?;
            list_endpoints(&client, project, run_id.as_ref()).await
        }
        EndpointCommands::Purge { run_id } => {
            let run_id = RunId::parse(&run_id)?;
            purge_run(&client, project, &run_id).await
        }
    }
}

/// Groups endpoint names by the run that deployed them
fn group_by_run(names: impl IntoIterator<Item = String>) -> BTreeMap<RunId, Vec<String>> {
    let mut runs: BTreeMap<RunId, Vec<String>> = BTreeMap::new();
    for name in names {
        if let Some(run_id) = RunId::from_endpoint_name(&name) {
            runs.entry(run_id).or_default().push(name);
        }
    }
    runs
}

async fn list_endpoints(client: &dyn DeployClient, project: &str, only: Option<&RunId>) -> Result<()> {
    let filter = EndpointFilter {
        project: project.to_string(),
        region: None,
    };
    let endpoints = client
        .list_endpoints(&filter)
        .await
        .context("Failed to list deployed endpoints")?;

    let mut runs = group_by_run(endpoints.into_iter().map(|e| e.name));
    if let Some(only) = only {
        runs.retain(|run_id, _| run_id == only);
    }

    if runs.is_empty() {
        println!("{}", "No test endpoints deployed.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} run(s) with deployed endpoints:", runs.len()).bold()
    );
    println!();
    for (run_id, names) in &runs {
        print_run(run_id, names);
    }

    Ok(())
}

fn print_run(run_id: &RunId, names: &[String]) {
    println!("  {} Run {}", "▸".cyan(), run_id.as_str().bold());
    if let Some(started) = run_id.started_at() {
        println!(
            "    Started:      {}",
            started.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }
    println!("    Endpoints:    {}", names.len().to_string().yellow());
    for name in names {
        println!("      {}", name);
    }
    println!();
}

async fn purge_run(client: &dyn DeployClient, project: &str, run_id: &RunId) -> Result<()> {
    let deleted = delete_run_endpoints(client, project, run_id)
        .await
        .with_context(|| format!("Failed to purge run {}", run_id))?;

    if deleted.is_empty() {
        println!("{}", format!("No endpoints deployed for run {}.", run_id).yellow());
    } else {
        println!(
            "{}",
            format!("✓ Deleted {} endpoint(s) of run {}", deleted.len(), run_id).green()
        );
        for name in &deleted {
            println!("  {}", name.dimmed());
        }
    }

    Ok(())
}
