//! Gauntlet Runner binary
//!
//! Reads its configuration from the environment, runs one full pass and
//! exits with the run's exit code.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use gauntlet_client::{DeployClient, ToolDeployClient};
use gauntlet_runner::orchestrator::{EXIT_CONFIG, RunOutcome};
use gauntlet_runner::{Config, Orchestrator, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let debug = std::env::var("DEBUG").is_ok_and(|v| gauntlet_runner::config::parse_flag(&v));
    let default_filter = if debug {
        "gauntlet_runner=debug,gauntlet_client=debug"
    } else {
        "gauntlet_runner=info,gauntlet_client=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Gauntlet Runner");

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    info!(
        "Loaded configuration: run_id={}, project={}, runtime={}",
        config.run_id, config.project_id, config.runtime
    );

    let client: Arc<dyn DeployClient> =
        Arc::new(ToolDeployClient::new(config.deploy_tool.clone()).with_debug(config.debug));
    let orchestrator = Orchestrator::from_config(&config, client);

    let cancel = CancellationToken::new();
    let listener = signal::install(cancel.clone());

    let report = orchestrator.run(cancel).await;
    listener.abort();

    if !report.cleanup.is_clean() {
        for e in &report.cleanup.errors {
            error!("Cleanup problem: {}", e);
        }
    }

    match &report.outcome {
        RunOutcome::Succeeded(_) => info!("Run {} succeeded", report.run_id),
        RunOutcome::Failed(e) => error!("Run {} failed: {}", report.run_id, e),
        RunOutcome::Interrupted => info!("Run {} interrupted", report.run_id),
    }

    ExitCode::from(report.exit_code())
}

/// Loads and validates configuration from environment variables
fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
