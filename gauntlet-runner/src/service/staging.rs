//! Staging service
//!
//! Builds the SDK artifact and prepares the function project to consume it:
//! the artifact is moved in under a run-scoped name, the dependency manifest
//! is rendered from its template, dependencies are installed from scratch
//! and the project is compiled. Every step runs with an explicit working
//! directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use gauntlet_core::RunId;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Layout;
use crate::process::{self, CommandSpec, ProcessError, remove_path};
use crate::runtime::{ArtifactPattern, RuntimeDelegate, staged_artifact_name};

/// Token replaced by the staged artifact reference
pub const ARTIFACT_TOKEN: &str = "__SDK_ARTIFACT__";
/// Token replaced by the runtime version pin
pub const RUNTIME_VERSION_TOKEN: &str = "__RUNTIME_VERSION__";
/// Token replaced by the admin library version
pub const ADMIN_SDK_VERSION_TOKEN: &str = "__ADMIN_SDK_VERSION__";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{step} step failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: ProcessError,
    },

    #[error("no artifact matching {pattern} in {}", .dir.display())]
    ArtifactMissing { dir: PathBuf, pattern: String },

    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    fn io<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> Self + 'a {
        move |source| Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A function project ready to be served and deployed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedProject {
    pub artifact: PathBuf,
    pub dependency_file: PathBuf,
}

/// Service trait for staging the function project
#[async_trait]
pub trait StagingService: Send + Sync {
    async fn stage(&self, run_id: &RunId, cancel: &CancellationToken) -> Result<StagedProject, BuildError>;
}

/// Stages through a [`RuntimeDelegate`]
pub struct StandardStagingService {
    delegate: Arc<dyn RuntimeDelegate>,
    layout: Layout,
    runtime_version: String,
    admin_sdk_version: String,
}

impl StandardStagingService {
    pub fn new(
        delegate: Arc<dyn RuntimeDelegate>,
        layout: Layout,
        runtime_version: impl Into<String>,
        admin_sdk_version: impl Into<String>,
    ) -> Self {
        Self {
            delegate,
            layout,
            runtime_version: runtime_version.into(),
            admin_sdk_version: admin_sdk_version.into(),
        }
    }

    async fn run_steps(
        &self,
        step: &'static str,
        commands: Vec<CommandSpec>,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        for command in commands {
            info!("Running {} step: {}", step, command.display());
            process::run_checked(&command, cancel)
                .await
                .map_err(|source| BuildError::Step { step, source })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StagingService for StandardStagingService {
    async fn stage(&self, run_id: &RunId, cancel: &CancellationToken) -> Result<StagedProject, BuildError> {
        let runtime = self.delegate.runtime();
        let pattern = self.delegate.artifact_pattern(&self.layout);

        let removed = remove_stale_artifacts(&pattern)?;
        if removed > 0 {
            debug!("Removed {} stale artifact(s) from {}", removed, pattern.dir.display());
        }

        self.run_steps("build", self.delegate.build_commands(&self.layout), cancel)
            .await?;

        let built = find_artifact(&pattern)?;
        let staged = self.layout.functions_dir.join(staged_artifact_name(
            self.delegate.package(),
            run_id,
            runtime,
        ));
        stage_artifact(&built, &staged)?;
        info!("Staged artifact {}", staged.display());

        let template = self.layout.functions_dir.join(runtime.dependency_template());
        let dependency_file = self.layout.functions_dir.join(runtime.dependency_file());
        let text = std::fs::read_to_string(&template).map_err(BuildError::io("read", &template))?;
        let rendered = render_template(
            &text,
            &self.delegate.artifact_reference(&staged),
            &self.runtime_version,
            &self.admin_sdk_version,
        );
        std::fs::write(&dependency_file, rendered).map_err(BuildError::io("write", &dependency_file))?;

        for path in self.delegate.stale_sdk_paths(&self.layout) {
            if remove_path(&path).map_err(BuildError::io("remove", &path))? {
                debug!("Removed cached SDK at {}", path.display());
            }
        }

        self.run_steps("install", self.delegate.install_commands(&self.layout), cancel)
            .await?;
        self.run_steps("compile", self.delegate.compile_commands(&self.layout), cancel)
            .await?;

        Ok(StagedProject {
            artifact: staged,
            dependency_file,
        })
    }
}

/// Substitutes the artifact and version tokens
pub fn render_template(
    template: &str,
    artifact: &str,
    runtime_version: &str,
    admin_sdk_version: &str,
) -> String {
    template
        .replace(ARTIFACT_TOKEN, artifact)
        .replace(RUNTIME_VERSION_TOKEN, runtime_version)
        .replace(ADMIN_SDK_VERSION_TOKEN, admin_sdk_version)
}

fn matching_artifacts(pattern: &ArtifactPattern) -> Result<Vec<PathBuf>, BuildError> {
    let entries = match std::fs::read_dir(&pattern.dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BuildError::io("read", &pattern.dir)(e)),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(BuildError::io("read", &pattern.dir))?;
        if pattern.matches(&entry.file_name().to_string_lossy()) {
            found.push(entry.path());
        }
    }
    Ok(found)
}

/// Deletes artifacts left behind by earlier builds
pub fn remove_stale_artifacts(pattern: &ArtifactPattern) -> Result<usize, BuildError> {
    let mut removed = 0;
    for path in matching_artifacts(pattern)? {
        if remove_path(&path).map_err(BuildError::io("remove", &path))? {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Newest artifact matching the pattern
pub fn find_artifact(pattern: &ArtifactPattern) -> Result<PathBuf, BuildError> {
    matching_artifacts(pattern)?
        .into_iter()
        .max_by_key(|path| {
            std::fs::metadata(path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH)
        })
        .ok_or_else(|| BuildError::ArtifactMissing {
            dir: pattern.dir.clone(),
            pattern: format!("{}*.{}", pattern.prefix, pattern.extension),
        })
}

/// Moves the artifact, copying when a rename crosses filesystems
pub fn stage_artifact(from: &Path, to: &Path) -> Result<(), BuildError> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(BuildError::io("copy", from))?;
    std::fs::remove_file(from).map_err(BuildError::io("remove", from))?;
    Ok(())
}
