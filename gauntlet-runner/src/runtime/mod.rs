//! Runtime delegates
//!
//! A delegate knows how a given language runtime builds the SDK artifact,
//! installs and compiles the function project, and serves the admin
//! introspection endpoint. Stages only ever see the [`RuntimeDelegate`] trait.

mod node;
mod python;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gauntlet_core::Runtime;

use crate::config::Layout;
use crate::process::CommandSpec;

pub use node::NodeDelegate;
pub use python::PythonDelegate;

/// Where a freshly built artifact lands and how it is named
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPattern {
    pub dir: PathBuf,
    pub prefix: String,
    pub extension: &'static str,
}

impl ArtifactPattern {
    pub fn matches(&self, file_name: &str) -> bool {
        file_name.starts_with(&self.prefix)
            && Path::new(file_name)
                .extension()
                .is_some_and(|ext| ext == self.extension)
    }
}

/// Runtime-specific commands of a run
pub trait RuntimeDelegate: Send + Sync {
    fn runtime(&self) -> Runtime;

    /// Package name of the SDK under test
    fn package(&self) -> &str;

    /// Commands producing the distributable artifact, in order
    fn build_commands(&self, layout: &Layout) -> Vec<CommandSpec>;

    /// Location and naming of the built artifact
    fn artifact_pattern(&self, layout: &Layout) -> ArtifactPattern;

    /// Value substituted for the artifact token in the dependency template
    fn artifact_reference(&self, staged: &Path) -> String;

    /// Local copies of the SDK removed before dependencies are installed
    fn stale_sdk_paths(&self, layout: &Layout) -> Vec<PathBuf>;

    fn install_commands(&self, layout: &Layout) -> Vec<CommandSpec>;

    fn compile_commands(&self, layout: &Layout) -> Vec<CommandSpec>;

    /// Command serving the admin endpoints for the staged project on `port`
    fn admin_server(&self, layout: &Layout, port: u16) -> CommandSpec;

    /// Command running the integration test suite
    fn test_command(&self, layout: &Layout) -> CommandSpec {
        CommandSpec::new("npm", &layout.harness_dir).args(["run", "test"])
    }
}

/// File name the artifact is staged under: `<package>-<runId>.<ext>`
pub fn staged_artifact_name(package: &str, run_id: &gauntlet_core::RunId, runtime: Runtime) -> String {
    format!("{}-{}.{}", package, run_id, runtime.artifact_extension())
}

/// Delegate for the configured runtime
pub fn delegate_for(runtime: Runtime, package: &str) -> Arc<dyn RuntimeDelegate> {
    match runtime {
        Runtime::Node => Arc::new(NodeDelegate::new(package)),
        Runtime::Python => Arc::new(PythonDelegate::new(package)),
    }
}
