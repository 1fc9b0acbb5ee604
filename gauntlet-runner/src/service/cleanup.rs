//! Cleanup coordinator
//!
//! Removes everything a run left behind: deployed endpoints carrying the run
//! prefix, and the generated files of the function project. Cleanup never
//! fails a run; problems are logged and reported.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gauntlet_client::{ClientError, DeleteOptions, DeployClient, EndpointFilter};
use gauntlet_core::{MANIFEST_FILE, RunId, Runtime};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Layout;
use crate::process::remove_path;
use crate::runtime::staged_artifact_name;

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("remote cleanup failed: {0}")]
    Remote(#[source] ClientError),

    #[error("failed to remove {}: {source}", .path.display())]
    Local {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a cleanup pass did
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub remote_deleted: Vec<String>,
    pub local_removed: Vec<PathBuf>,
    pub errors: Vec<CleanupError>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct CleanupCoordinator {
    client: Arc<dyn DeployClient>,
    project: String,
    layout: Layout,
    runtime: Runtime,
    package: String,
}

impl CleanupCoordinator {
    pub fn new(
        client: Arc<dyn DeployClient>,
        project: impl Into<String>,
        layout: Layout,
        runtime: Runtime,
        package: impl Into<String>,
    ) -> Self {
        Self {
            client,
            project: project.into(),
            layout,
            runtime,
            package: package.into(),
        }
    }

    /// Deletes every deployed endpoint owned by the run
    pub async fn remote(&self, run_id: &RunId) -> Result<Vec<String>, ClientError> {
        delete_run_endpoints(self.client.as_ref(), &self.project, run_id).await
    }

    /// Files and directories a run generates in the function project
    pub fn local_targets(&self, run_id: &RunId) -> Vec<PathBuf> {
        let functions = &self.layout.functions_dir;
        let mut targets = vec![
            functions.join(staged_artifact_name(&self.package, run_id, self.runtime)),
            functions.join(self.runtime.dependency_file()),
            functions.join(MANIFEST_FILE),
        ];
        targets.extend(self.runtime.compiled_dir().map(|dir| functions.join(dir)));
        targets.extend(self.runtime.env_dir().map(|dir| functions.join(dir)));
        targets.extend(debug_logs(functions));
        targets.extend(debug_logs(&self.layout.harness_dir));
        targets
    }

    /// Removes the run's local files; missing ones are skipped
    pub fn local(&self, run_id: &RunId) -> (Vec<PathBuf>, Vec<CleanupError>) {
        let mut removed = Vec::new();
        let mut errors = Vec::new();

        for path in self.local_targets(run_id) {
            match remove_path(&path) {
                Ok(true) => {
                    debug!("Removed {}", path.display());
                    removed.push(path);
                }
                Ok(false) => {}
                Err(source) => {
                    warn!("Failed to remove {}: {}", path.display(), source);
                    errors.push(CleanupError::Local { path, source });
                }
            }
        }

        (removed, errors)
    }

    /// Runs remote then local cleanup, collecting failures
    pub async fn run(&self, run_id: &RunId) -> CleanupReport {
        let mut report = CleanupReport::default();

        match self.remote(run_id).await {
            Ok(deleted) => report.remote_deleted = deleted,
            Err(e) => {
                warn!(run_id = %run_id, "Remote cleanup failed: {}", e);
                report.errors.push(CleanupError::Remote(e));
            }
        }

        let (removed, errors) = self.local(run_id);
        report.local_removed = removed;
        report.errors.extend(errors);

        info!(
            run_id = %run_id,
            remote = report.remote_deleted.len(),
            local = report.local_removed.len(),
            errors = report.errors.len(),
            "Cleanup finished"
        );
        report
    }
}

/// Deletes the deployed endpoints carrying the run's prefix
///
/// Returns the deleted names; endpoints of other runs are left alone.
pub async fn delete_run_endpoints(
    client: &dyn DeployClient,
    project: &str,
    run_id: &RunId,
) -> Result<Vec<String>, ClientError> {
    let filter = EndpointFilter {
        project: project.to_string(),
        region: None,
    };
    let owned: Vec<String> = client
        .list_endpoints(&filter)
        .await?
        .into_iter()
        .map(|endpoint| endpoint.name)
        .filter(|name| run_id.owns(name))
        .collect();

    if owned.is_empty() {
        debug!(run_id = %run_id, "No deployed endpoints to delete");
        return Ok(owned);
    }

    info!(run_id = %run_id, count = owned.len(), "Deleting deployed endpoints");
    let opts = DeleteOptions {
        project: project.to_string(),
        region: None,
        force: true,
    };
    client.delete_endpoints(&owned, &opts).await?;
    Ok(owned)
}

fn debug_logs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .is_some_and(|n| n.to_string_lossy().ends_with("-debug.log"))
        })
        .collect()
}
