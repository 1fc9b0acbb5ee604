//! Error type of a failed stage

use thiserror::Error;

use crate::config::ConfigError;
use crate::service::deployment::DeploymentError;
use crate::service::discovery::DiscoveryError;
use crate::service::staging::BuildError;
use crate::service::suite::TestExecutionError;
use gauntlet_core::ManifestError;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("build failed: {0}")]
    Build(#[from] BuildError),

    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("manifest unreadable: {0}")]
    Manifest(#[from] ManifestError),

    #[error("deployment failed: {0}")]
    Deployment(#[from] DeploymentError),

    #[error("test execution failed: {0}")]
    TestExecution(#[from] TestExecutionError),

    #[error("tests failed: {}", .reason.as_deref().unwrap_or("see output"))]
    TestsFailed { reason: Option<String>, output: String },

    #[error("interrupted")]
    Interrupted,
}
