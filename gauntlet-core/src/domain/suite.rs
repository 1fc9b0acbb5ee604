//! Test suite result

use serde::{Deserialize, Serialize};

/// Outcome of a test suite that ran to completion
///
/// `passed` is derived from the suite's output, not from its exit status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: bool,
    /// Combined stdout and stderr, in arrival order
    pub output: String,
    pub error: Option<String>,
}

impl TestResult {
    pub fn passed(output: String) -> Self {
        Self {
            passed: true,
            output,
            error: None,
        }
    }

    pub fn failed(output: String, error: impl Into<String>) -> Self {
        Self {
            passed: false,
            output,
            error: Some(error.into()),
        }
    }
}
