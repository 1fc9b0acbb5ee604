//! Test suite service
//!
//! Runs the integration suite against the live deployment and classifies
//! its output.

use std::time::Duration;

use async_trait::async_trait;
use gauntlet_core::{RunId, TestResult};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::process::{self, CommandSpec, ProcessError};

#[derive(Debug, Error)]
pub enum TestExecutionError {
    #[error("failed to start test suite: {0}")]
    Spawn(#[source] ProcessError),

    #[error("test suite exited with code {code:?}")]
    Exited { code: Option<i32>, output: String },

    #[error("test suite timed out after {limit:?}")]
    TimedOut { limit: Duration, output: String },

    #[error("test suite cancelled")]
    Cancelled,
}

/// Substrings deciding the verdict of a clean exit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteMarkers {
    pub pass: String,
    pub fail: String,
}

impl Default for SuiteMarkers {
    fn default() -> Self {
        Self {
            pass: "PASS".to_string(),
            fail: "FAIL".to_string(),
        }
    }
}

/// Classifies output of a suite that exited 0
pub fn classify(output: &str, markers: &SuiteMarkers) -> TestResult {
    if output.contains(&markers.fail) {
        TestResult::failed(output.to_string(), format!("output contains {}", markers.fail))
    } else if output.contains(&markers.pass) {
        TestResult::passed(output.to_string())
    } else {
        TestResult::failed(output.to_string(), format!("output lacks {}", markers.pass))
    }
}

/// Service trait for running the test suite
#[async_trait]
pub trait SuiteService: Send + Sync {
    async fn run(&self, run_id: &RunId, cancel: &CancellationToken) -> Result<TestResult, TestExecutionError>;
}

/// Runs a suite command under a hard timeout
pub struct StandardSuiteService {
    command: CommandSpec,
    timeout: Duration,
    markers: SuiteMarkers,
}

impl StandardSuiteService {
    pub fn new(command: CommandSpec, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            markers: SuiteMarkers::default(),
        }
    }

    pub fn with_markers(mut self, markers: SuiteMarkers) -> Self {
        self.markers = markers;
        self
    }
}

#[async_trait]
impl SuiteService for StandardSuiteService {
    async fn run(&self, run_id: &RunId, cancel: &CancellationToken) -> Result<TestResult, TestExecutionError> {
        let command = self
            .command
            .clone()
            .env("TEST_RUN_ID", run_id.as_str())
            .timeout(self.timeout);
        info!(run_id = %run_id, "Running test suite: {}", command.display());

        let output = process::run(&command, cancel).await.map_err(|e| match e {
            ProcessError::TimedOut { limit, output, .. } => {
                warn!("Test suite timed out after {:?}", limit);
                TestExecutionError::TimedOut {
                    limit,
                    output: output.combined,
                }
            }
            ProcessError::Cancelled { .. } => TestExecutionError::Cancelled,
            other => TestExecutionError::Spawn(other),
        })?;

        if !output.success() {
            warn!("Test suite exited with code {:?}", output.exit_code);
            return Err(TestExecutionError::Exited {
                code: output.exit_code,
                output: output.combined,
            });
        }

        let result = classify(&output.combined, &self.markers);
        info!(passed = result.passed, "Test suite finished");
        Ok(result)
    }
}
