//! Deploying client capability
//!
//! The orchestrator depends on exactly three backend operations: listing,
//! deleting, and deploying endpoints. Transport and auth live behind this trait.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// An endpoint currently deployed on the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedEndpoint {
    #[serde(alias = "id")]
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
}

impl DeployedEndpoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: None,
        }
    }
}

/// Scope of a listing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointFilter {
    pub project: String,
    pub region: Option<String>,
}

/// Options of a delete call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOptions {
    pub project: String,
    pub region: Option<String>,
    /// Skip interactive confirmation
    pub force: bool,
}

/// Options of a deploy call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOptions {
    pub project: String,
    /// Endpoint names to deploy; the call is atomic over this set
    pub only: Vec<String>,
    /// Directory the deploy tool runs in
    pub cwd: PathBuf,
    pub force: bool,
}

/// Backend operations the harness relies on
#[async_trait]
pub trait DeployClient: Send + Sync {
    /// Lists currently deployed endpoints
    async fn list_endpoints(&self, filter: &EndpointFilter) -> Result<Vec<DeployedEndpoint>>;

    /// Deletes the named endpoints
    async fn delete_endpoints(&self, names: &[String], opts: &DeleteOptions) -> Result<()>;

    /// Deploys the endpoints named in `opts.only`
    async fn deploy(&self, opts: &DeployOptions) -> Result<()>;
}
