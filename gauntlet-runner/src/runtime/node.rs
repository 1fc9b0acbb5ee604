//! Node.js delegate

use std::path::{Path, PathBuf};

use gauntlet_core::Runtime;

use super::{ArtifactPattern, RuntimeDelegate};
use crate::config::Layout;
use crate::process::CommandSpec;

/// Builds with npm and serves discovery through the SDK's bundled binary
pub struct NodeDelegate {
    package: String,
}

impl NodeDelegate {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
        }
    }
}

impl RuntimeDelegate for NodeDelegate {
    fn runtime(&self) -> Runtime {
        Runtime::Node
    }

    fn package(&self) -> &str {
        &self.package
    }

    fn build_commands(&self, layout: &Layout) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("npm", &layout.sdk_root).args(["run", "build"]),
            CommandSpec::new("npm", &layout.sdk_root).arg("pack"),
        ]
    }

    fn artifact_pattern(&self, layout: &Layout) -> ArtifactPattern {
        ArtifactPattern {
            dir: layout.sdk_root.clone(),
            prefix: format!("{}-", self.package),
            extension: Runtime::Node.artifact_extension(),
        }
    }

    fn artifact_reference(&self, staged: &Path) -> String {
        let file_name = staged
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        format!("file:{}", file_name)
    }

    fn stale_sdk_paths(&self, layout: &Layout) -> Vec<PathBuf> {
        vec![layout.functions_dir.join("node_modules").join(&self.package)]
    }

    fn install_commands(&self, layout: &Layout) -> Vec<CommandSpec> {
        vec![CommandSpec::new("npm", &layout.functions_dir).arg("install")]
    }

    fn compile_commands(&self, layout: &Layout) -> Vec<CommandSpec> {
        vec![CommandSpec::new("npm", &layout.functions_dir).args(["run", "build"])]
    }

    fn admin_server(&self, layout: &Layout, port: u16) -> CommandSpec {
        let binary = layout
            .functions_dir
            .join("node_modules")
            .join(".bin")
            .join(&self.package);

        CommandSpec::new(binary.to_string_lossy(), &layout.functions_dir)
            .arg(layout.functions_dir.to_string_lossy())
            .env("PORT", port.to_string())
            .env("ADMIN_PORT", port.to_string())
            .env("FUNCTIONS_CONTROL_API", "true")
    }
}
