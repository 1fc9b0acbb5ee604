//! Run orchestrator
//!
//! Sequences the stages of one run and guarantees cleanup on every exit
//! path. Any failure or interrupt moves the run to `CleaningUp` before it
//! reaches a terminal state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use gauntlet_client::DeployClient;
use gauntlet_core::{Manifest, RunId, TestResult};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::StageError;
use crate::runtime::delegate_for;
use crate::service::{
    CleanupCoordinator, CleanupReport, DeployTarget, DeploymentDriver, DiscoveryService,
    StagingService, StandardDiscoveryService, StandardStagingService, StandardSuiteService,
    SuiteService,
};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Configuring,
    Staging,
    Discovering,
    Deploying,
    Testing,
    CleaningUp,
    Succeeded,
    Failed,
    Interrupted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Interrupted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuring => "configuring",
            Self::Staging => "staging",
            Self::Discovering => "discovering",
            Self::Deploying => "deploying",
            Self::Testing => "testing",
            Self::CleaningUp => "cleaning-up",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Succeeded(TestResult),
    Failed(StageError),
    Interrupted,
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Succeeded(_) => EXIT_SUCCESS,
            Self::Failed(StageError::Configuration(_)) => EXIT_CONFIG,
            Self::Failed(_) => EXIT_FAILURE,
            Self::Interrupted => EXIT_INTERRUPTED,
        }
    }
}

/// Everything known about a finished run
#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,
    pub outcome: RunOutcome,
    /// States entered, in order
    pub history: Vec<RunState>,
    pub cleanup: CleanupReport,
}

impl RunReport {
    pub fn exit_code(&self) -> u8 {
        self.outcome.exit_code()
    }
}

pub struct Orchestrator {
    run_id: RunId,
    staging: Arc<dyn StagingService>,
    discovery: Arc<dyn DiscoveryService>,
    deployment: DeploymentDriver,
    target: DeployTarget,
    suite: Arc<dyn SuiteService>,
    cleanup: CleanupCoordinator,
    cleaned: AtomicBool,
    history: Vec<RunState>,
}

impl Orchestrator {
    pub fn new(
        run_id: RunId,
        staging: Arc<dyn StagingService>,
        discovery: Arc<dyn DiscoveryService>,
        deployment: DeploymentDriver,
        target: DeployTarget,
        suite: Arc<dyn SuiteService>,
        cleanup: CleanupCoordinator,
    ) -> Self {
        Self {
            run_id,
            staging,
            discovery,
            deployment,
            target,
            suite,
            cleanup,
            cleaned: AtomicBool::new(false),
            history: vec![RunState::Configuring],
        }
    }

    /// Wires the standard services for a validated configuration
    pub fn from_config(config: &Config, client: Arc<dyn DeployClient>) -> Self {
        let layout = config.layout.clone();
        let delegate = delegate_for(config.runtime, &config.sdk_package);
        let env = config.run_environment();

        let staging = StandardStagingService::new(
            delegate.clone(),
            layout.clone(),
            config.runtime_version.clone(),
            config.admin_sdk_version.clone(),
        );
        let discovery =
            StandardDiscoveryService::new(delegate.clone(), layout.clone(), config.discovery_timeout)
                .with_port(config.discovery_port)
                .with_env(env.clone());
        let suite = StandardSuiteService::new(
            delegate.test_command(&layout).envs(env),
            config.test_timeout,
        )
        .with_markers(config.suite_markers.clone());
        let cleanup = CleanupCoordinator::new(
            client.clone(),
            config.project_id.clone(),
            layout.clone(),
            config.runtime,
            config.sdk_package.clone(),
        );
        let target = DeployTarget {
            project: config.project_id.clone(),
            cwd: layout.functions_dir.clone(),
        };

        Self::new(
            config.run_id.clone(),
            Arc::new(staging),
            Arc::new(discovery),
            DeploymentDriver::new(client, config.deploy_policy()),
            target,
            Arc::new(suite),
            cleanup,
        )
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn enter(&mut self, state: RunState) {
        if let Some(current) = self.history.last().filter(|s| s.is_terminal()) {
            warn!(run_id = %self.run_id, "Ignoring {} after terminal state {}", state, current);
            return;
        }
        info!(run_id = %self.run_id, state = %state, "Entering state");
        self.history.push(state);
    }

    fn checkpoint(cancel: &CancellationToken) -> Result<(), StageError> {
        if cancel.is_cancelled() {
            return Err(StageError::Interrupted);
        }
        Ok(())
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<TestResult, StageError> {
        Self::checkpoint(cancel)?;
        self.enter(RunState::Staging);
        let staged = self.staging.stage(&self.run_id, cancel).await?;
        info!("Staged artifact {}", staged.artifact.display());

        Self::checkpoint(cancel)?;
        self.enter(RunState::Discovering);
        let discovery = self.discovery.discover(&self.run_id, cancel).await?;

        let manifest = Manifest::load(&discovery.manifest_path);
        discovery.server.stop().await;
        let manifest = manifest?;
        let names = manifest.names();
        info!(endpoints = names.len(), "Discovered endpoints");

        Self::checkpoint(cancel)?;
        self.enter(RunState::Deploying);
        self.deployment.deploy(&names, &self.target, cancel).await?;

        Self::checkpoint(cancel)?;
        self.enter(RunState::Testing);
        let result = self.suite.run(&self.run_id, cancel).await?;
        if !result.passed {
            return Err(StageError::TestsFailed {
                reason: result.error.clone(),
                output: result.output,
            });
        }

        Ok(result)
    }

    /// Runs cleanup unless it already ran
    async fn cleanup_once(&self) -> CleanupReport {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            warn!(run_id = %self.run_id, "Cleanup already ran");
            return CleanupReport::default();
        }
        self.cleanup.run(&self.run_id).await
    }

    /// Executes the run to a terminal state
    pub async fn run(mut self, cancel: CancellationToken) -> RunReport {
        info!(run_id = %self.run_id, "Starting run");
        let result = self.execute(&cancel).await;

        self.enter(RunState::CleaningUp);
        let cleanup = self.cleanup_once().await;

        let outcome = match result {
            _ if cancel.is_cancelled() => RunOutcome::Interrupted,
            Err(StageError::Interrupted) => RunOutcome::Interrupted,
            Ok(result) => RunOutcome::Succeeded(result),
            Err(e) => RunOutcome::Failed(e),
        };

        let terminal = match &outcome {
            RunOutcome::Succeeded(_) => RunState::Succeeded,
            RunOutcome::Failed(e) => {
                error!(run_id = %self.run_id, "Run failed: {}", e);
                RunState::Failed
            }
            RunOutcome::Interrupted => {
                warn!(run_id = %self.run_id, "Run interrupted");
                RunState::Interrupted
            }
        };
        self.enter(terminal);

        RunReport {
            run_id: self.run_id,
            outcome,
            history: self.history,
            cleanup,
        }
    }
}
