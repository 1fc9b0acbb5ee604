//! Runtime selection
//!
//! The harness can exercise the SDK on one of a fixed set of language
//! runtimes. Each runtime fixes the file conventions of its function project.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported function runtimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Node,
    Python,
}

/// Error returned for a runtime selector outside the supported set
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported runtime '{0}' (expected one of: node, python)")]
pub struct UnsupportedRuntime(pub String);

impl Runtime {
    pub const ALL: [Runtime; 2] = [Runtime::Node, Runtime::Python];

    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Node => "node",
            Runtime::Python => "python",
        }
    }

    /// Template the dependency manifest is rendered from
    pub fn dependency_template(&self) -> &'static str {
        match self {
            Runtime::Node => "package.json.template",
            Runtime::Python => "requirements.txt.template",
        }
    }

    /// Dependency manifest written into the function project
    pub fn dependency_file(&self) -> &'static str {
        match self {
            Runtime::Node => "package.json",
            Runtime::Python => "requirements.txt",
        }
    }

    /// File extension of the packaged SDK artifact
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            Runtime::Node => "tgz",
            Runtime::Python => "whl",
        }
    }

    /// Directory holding compiled function code, if the runtime compiles
    pub fn compiled_dir(&self) -> Option<&'static str> {
        match self {
            Runtime::Node => Some("lib"),
            Runtime::Python => None,
        }
    }

    /// Directory holding the isolated dependency environment, if any
    pub fn env_dir(&self) -> Option<&'static str> {
        match self {
            Runtime::Node => None,
            Runtime::Python => Some("venv"),
        }
    }

    /// Runtime version pinned when none is configured
    pub fn default_version(&self) -> &'static str {
        match self {
            Runtime::Node => "18",
            Runtime::Python => "3.10",
        }
    }

    /// Admin library version pinned when none is configured
    pub fn default_admin_version(&self) -> &'static str {
        match self {
            Runtime::Node => "^12.0.0",
            Runtime::Python => "6.5.0",
        }
    }
}

impl std::str::FromStr for Runtime {
    type Err = UnsupportedRuntime;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "node" => Ok(Runtime::Node),
            "python" => Ok(Runtime::Python),
            _ => Err(UnsupportedRuntime(s.to_string())),
        }
    }
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_runtime() {
        assert_eq!("node".parse::<Runtime>(), Ok(Runtime::Node));
        assert_eq!("Python".parse::<Runtime>(), Ok(Runtime::Python));
        assert_eq!(
            "ruby".parse::<Runtime>(),
            Err(UnsupportedRuntime("ruby".to_string()))
        );
    }

    #[test]
    fn test_runtime_conventions() {
        assert_eq!(Runtime::Node.dependency_file(), "package.json");
        assert_eq!(Runtime::Node.compiled_dir(), Some("lib"));
        assert_eq!(Runtime::Python.env_dir(), Some("venv"));
        assert_eq!(Runtime::Python.artifact_extension(), "whl");
    }
}
