//! Configuration module
//!
//! Settings shared by every CLI command.

use anyhow::{Result, anyhow};

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Project the test endpoints live in; only remote commands need it
    pub project: Option<String>,
    /// Deploy tool binary
    pub tool: String,
}

impl Config {
    pub fn require_project(&self) -> Result<&str> {
        self.project
            .as_deref()
            .ok_or_else(|| anyhow!("no project given: pass --project or set PROJECT_ID"))
    }
}
