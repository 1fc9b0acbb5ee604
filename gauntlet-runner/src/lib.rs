//! Gauntlet Runner
//!
//! Runs one pass of the integration-test harness: builds the SDK, discovers
//! and renames its endpoints, deploys them in rate-limited batches, runs the
//! test suite against the live deployment and removes everything afterwards.
//!
//! Architecture:
//! - Configuration: settings read from the environment
//! - Process: owned child processes with graceful termination
//! - Runtime: per-language build, install and serve commands
//! - Services: one per stage (staging, discovery, deployment, suite, cleanup)
//! - Orchestrator: the run state machine and its cleanup guarantee

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod process;
pub mod runtime;
pub mod service;
pub mod signal;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigError, Layout};
pub use error::StageError;
pub use orchestrator::{Orchestrator, RunOutcome, RunReport, RunState};
