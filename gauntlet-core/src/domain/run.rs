//! Run identifier
//!
//! A run identifier is generated once per harness invocation and scopes every
//! artifact file name, every deployed endpoint name, and every cleanup filter.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix of every generated run identifier
pub const RUN_ID_PREFIX: char = 't';

/// Unique token for one harness run, e.g. `t1700000000000`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

/// Error returned when parsing an operator-supplied run identifier
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid run id '{0}': expected 't' followed by unix milliseconds")]
pub struct RunIdError(pub String);

impl RunId {
    /// Generates a run identifier from the current wall-clock time in milliseconds
    pub fn generate() -> Self {
        Self::from_millis(chrono::Utc::now().timestamp_millis())
    }

    /// Builds a run identifier from a unix timestamp in milliseconds
    pub fn from_millis(millis: i64) -> Self {
        Self(format!("{}{}", RUN_ID_PREFIX, millis))
    }

    /// Parses a run identifier of the form `t<digits>`
    pub fn parse(input: &str) -> Result<Self, RunIdError> {
        let digits = input
            .strip_prefix(RUN_ID_PREFIX)
            .ok_or_else(|| RunIdError(input.to_string()))?;

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(RunIdError(input.to_string()));
        }

        Ok(Self(input.to_string()))
    }

    /// Extracts the run identifier embedded at the start of a rewritten endpoint name
    pub fn from_endpoint_name(name: &str) -> Option<Self> {
        let (prefix, rest) = name.split_once('-')?;
        if rest.is_empty() {
            return None;
        }
        Self::parse(prefix).ok()
    }

    /// The prefix every endpoint of this run carries (`<runId>-`)
    pub fn endpoint_prefix(&self) -> String {
        format!("{}-", self.0)
    }

    /// Whether a deployed endpoint name belongs to this run
    pub fn owns(&self, endpoint_name: &str) -> bool {
        endpoint_name.starts_with(&self.endpoint_prefix())
    }

    /// Wall-clock time the run started, recovered from the identifier
    pub fn started_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let millis = self.0.strip_prefix(RUN_ID_PREFIX)?.parse::<i64>().ok()?;
        chrono::DateTime::from_timestamp_millis(millis)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = RunIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
