//! Endpoint manifest
//!
//! The discovered endpoint declaration, rewritten for one run, persisted
//! between discovery and deployment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::endpoint::{EndpointSet, RewriteError, rewrite_endpoints};
use super::run::RunId;

/// Schema revision the deploying tool speaks
pub const MANIFEST_SPEC_VERSION: &str = "v1alpha1";

/// File name of the manifest inside the function project
pub const MANIFEST_FILE: &str = "functions.yaml";

/// Endpoint declaration as served by the admin server
///
/// Fields other than `endpoints` and `specVersion` are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveredSpec {
    #[serde(default)]
    pub endpoints: EndpointSet,
    #[serde(rename = "specVersion", default)]
    pub spec_version: Option<String>,
}

impl DiscoveredSpec {
    pub fn from_yaml(text: &str) -> Result<Self, ManifestError> {
        serde_yaml::from_str(text).map_err(ManifestError::Yaml)
    }
}

/// Rewritten endpoint declaration consumed by the deployment stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub endpoints: EndpointSet,
    #[serde(rename = "specVersion")]
    pub spec_version: String,
}

/// Errors reading or writing a manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to access manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest yaml: {0}")]
    Yaml(#[source] serde_yaml::Error),
}

impl Manifest {
    /// Rewrites a discovered declaration for the given run
    pub fn from_discovered(run_id: &RunId, spec: DiscoveredSpec) -> Result<Self, RewriteError> {
        Ok(Self {
            endpoints: rewrite_endpoints(run_id, spec.endpoints)?,
            spec_version: MANIFEST_SPEC_VERSION.to_string(),
        })
    }

    /// Rewritten endpoint names, in sorted order
    pub fn names(&self) -> Vec<String> {
        self.endpoints.keys().cloned().collect()
    }

    pub fn to_yaml(&self) -> Result<String, ManifestError> {
        serde_yaml::to_string(self).map_err(ManifestError::Yaml)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ManifestError> {
        serde_yaml::from_str(text).map_err(ManifestError::Yaml)
    }

    /// Writes the manifest to `path`, replacing any previous file
    pub fn write(&self, path: &Path) -> Result<(), ManifestError> {
        let text = self.to_yaml()?;
        std::fs::write(path, text).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }
}
