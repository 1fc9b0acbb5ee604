//! Python delegate

use std::path::{Path, PathBuf};

use gauntlet_core::Runtime;

use super::{ArtifactPattern, RuntimeDelegate};
use crate::config::Layout;
use crate::process::CommandSpec;

/// Builds a wheel and runs the function project inside a virtual environment
pub struct PythonDelegate {
    package: String,
}

impl PythonDelegate {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
        }
    }

    /// Import name of the package (`firebase-functions` -> `firebase_functions`)
    fn module(&self) -> String {
        self.package.replace('-', "_")
    }

    fn venv_python(&self, layout: &Layout) -> PathBuf {
        layout.functions_dir.join("venv").join("bin").join("python")
    }
}

impl RuntimeDelegate for PythonDelegate {
    fn runtime(&self) -> Runtime {
        Runtime::Python
    }

    fn package(&self) -> &str {
        &self.package
    }

    fn build_commands(&self, layout: &Layout) -> Vec<CommandSpec> {
        vec![CommandSpec::new("python3", &layout.sdk_root).args(["-m", "build", "-w", "-o", "dist"])]
    }

    fn artifact_pattern(&self, layout: &Layout) -> ArtifactPattern {
        ArtifactPattern {
            dir: layout.sdk_root.join("dist"),
            prefix: format!("{}-", self.module()),
            extension: Runtime::Python.artifact_extension(),
        }
    }

    fn artifact_reference(&self, staged: &Path) -> String {
        let file_name = staged
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        format!("./{}", file_name)
    }

    fn stale_sdk_paths(&self, layout: &Layout) -> Vec<PathBuf> {
        // A fresh environment guarantees no cached copy of the SDK survives
        vec![layout.functions_dir.join("venv")]
    }

    fn install_commands(&self, layout: &Layout) -> Vec<CommandSpec> {
        let python = self.venv_python(layout);
        vec![
            CommandSpec::new("python3", &layout.functions_dir).args(["-m", "venv", "venv"]),
            CommandSpec::new(python.to_string_lossy(), &layout.functions_dir).args([
                "-m",
                "pip",
                "install",
                "-r",
                Runtime::Python.dependency_file(),
            ]),
        ]
    }

    fn compile_commands(&self, _layout: &Layout) -> Vec<CommandSpec> {
        Vec::new()
    }

    fn admin_server(&self, layout: &Layout, port: u16) -> CommandSpec {
        let script = format!(
            "from {}.private.serving import serve_admin; serve_admin()",
            self.module()
        );

        CommandSpec::new(self.venv_python(layout).to_string_lossy(), &layout.functions_dir)
            .args(["-c".to_string(), script])
            .env("ADMIN_PORT", port.to_string())
            .env("PORT", port.to_string())
            .env("FUNCTIONS_CONTROL_API", "true")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_layout() {
        let layout = Layout::new("/sdk", "/sdk/integration_test");
        let delegate = PythonDelegate::new("firebase-functions");

        let pattern = delegate.artifact_pattern(&layout);
        assert_eq!(pattern.dir, PathBuf::from("/sdk/dist"));
        assert!(pattern.matches("firebase_functions-0.4.0-py3-none-any.whl"));

        assert!(delegate.compile_commands(&layout).is_empty());
        assert_eq!(
            delegate.stale_sdk_paths(&layout),
            vec![PathBuf::from("/sdk/integration_test/functions/venv")]
        );
    }

    #[test]
    fn test_python_admin_server() {
        let layout = Layout::new("/sdk", "/sdk/integration_test");
        let spec = PythonDelegate::new("firebase-functions").admin_server(&layout, 9001);

        assert!(spec.program.ends_with("venv/bin/python"));
        assert!(spec.args[1].contains("firebase_functions.private.serving"));
        assert!(spec.env.contains(&("ADMIN_PORT".to_string(), "9001".to_string())));
    }
}
