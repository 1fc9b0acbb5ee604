//! Runner configuration
//!
//! Defines all settings of a harness run: the target project, the runtime
//! under test, file layout, deployment limits, and stage timeouts.
//! Settings come from environment variables and are validated up front.

use std::path::PathBuf;
use std::time::Duration;

use gauntlet_core::{RunId, Runtime, UnsupportedRuntime};
use thiserror::Error;

use crate::service::deployment::DeployPolicy;
use crate::service::suite::SuiteMarkers;

/// Errors loading the configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error(transparent)]
    UnsupportedRuntime(#[from] UnsupportedRuntime),

    #[error("invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Directories a run works in
///
/// Every stage receives these paths explicitly; the process working
/// directory is never changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Root of the SDK sources the artifact is built from
    pub sdk_root: PathBuf,
    /// Integration test project (test suite, deploy tool config)
    pub harness_dir: PathBuf,
    /// Function project deployed to the backend
    pub functions_dir: PathBuf,
}

impl Layout {
    pub fn new(sdk_root: impl Into<PathBuf>, harness_dir: impl Into<PathBuf>) -> Self {
        let harness_dir = harness_dir.into();
        Self {
            sdk_root: sdk_root.into(),
            functions_dir: harness_dir.join("functions"),
            harness_dir,
        }
    }
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier scoping every artifact and endpoint of this run
    pub run_id: RunId,

    pub project_id: String,
    pub database_url: String,
    pub storage_bucket: String,
    pub app_id: String,
    pub auth_domain: String,
    pub api_key: String,

    /// Runtime the functions are deployed on
    pub runtime: Runtime,
    pub runtime_version: String,
    pub admin_sdk_version: String,

    pub region: String,
    pub storage_region: String,

    /// Verbose logging in the runner and the deploy tool
    pub debug: bool,

    pub layout: Layout,

    /// Package name of the SDK under test
    pub sdk_package: String,

    /// Program implementing the deploy backend operations
    pub deploy_tool: String,

    pub deploy_batch_size: usize,
    pub deploy_concurrency: usize,
    pub deploy_max_attempts: u32,

    /// Time allowed for the admin server to answer introspection
    pub discovery_timeout: Duration,

    /// Pin the admin server port instead of picking a free one
    pub discovery_port: Option<u16>,

    /// Hard ceiling on the test suite
    pub test_timeout: Duration,

    /// Substrings the suite prints for a pass or a failure
    pub suite_markers: SuiteMarkers,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Required environment variables:
    /// - PROJECT_ID, DATABASE_URL, STORAGE_BUCKET
    /// - APP_ID, AUTH_DOMAIN, API_KEY
    /// - TEST_RUNTIME (node | python)
    ///
    /// Optional environment variables:
    /// - RUNTIME_VERSION, ADMIN_SDK_VERSION (default: per runtime)
    /// - REGION (default: us-central1), STORAGE_REGION (default: REGION)
    /// - DEBUG (default: off)
    /// - SDK_ROOT (default: .), HARNESS_DIR (default: SDK_ROOT/integration_test)
    /// - SDK_PACKAGE (default: firebase-functions), DEPLOY_TOOL (default: firebase)
    /// - DEPLOY_BATCH_SIZE (default: 8), DEPLOY_CONCURRENCY (default: 2),
    ///   DEPLOY_MAX_ATTEMPTS (default: 4)
    /// - DISCOVERY_TIMEOUT_SECS (default: 10), DISCOVERY_PORT (default: any free port)
    /// - TEST_TIMEOUT_SECS (default: 600)
    /// - TEST_PASS_MARKER (default: PASS), TEST_FAIL_MARKER (default: FAIL)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Creates configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| optional(name).ok_or(ConfigError::Missing(name));

        let project_id = required("PROJECT_ID")?;
        let database_url = required("DATABASE_URL")?;
        let storage_bucket = required("STORAGE_BUCKET")?;
        let app_id = required("APP_ID")?;
        let auth_domain = required("AUTH_DOMAIN")?;
        let api_key = required("API_KEY")?;

        let runtime: Runtime = required("TEST_RUNTIME")?.parse()?;

        let runtime_version =
            optional("RUNTIME_VERSION").unwrap_or_else(|| runtime.default_version().to_string());
        let admin_sdk_version = optional("ADMIN_SDK_VERSION")
            .unwrap_or_else(|| runtime.default_admin_version().to_string());

        let region = optional("REGION").unwrap_or_else(|| "us-central1".to_string());
        let storage_region = optional("STORAGE_REGION").unwrap_or_else(|| region.clone());

        let debug = optional("DEBUG").is_some_and(|v| parse_flag(&v));

        let sdk_root = PathBuf::from(optional("SDK_ROOT").unwrap_or_else(|| ".".to_string()));
        let harness_dir = optional("HARNESS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| sdk_root.join("integration_test"));

        let sdk_package =
            optional("SDK_PACKAGE").unwrap_or_else(|| "firebase-functions".to_string());
        let deploy_tool = optional("DEPLOY_TOOL").unwrap_or_else(|| "firebase".to_string());

        let deploy_batch_size = parse_number("DEPLOY_BATCH_SIZE", optional("DEPLOY_BATCH_SIZE"), 8)?;
        let deploy_concurrency =
            parse_number("DEPLOY_CONCURRENCY", optional("DEPLOY_CONCURRENCY"), 2)?;
        let deploy_max_attempts =
            parse_number("DEPLOY_MAX_ATTEMPTS", optional("DEPLOY_MAX_ATTEMPTS"), 4)?;

        let discovery_timeout = Duration::from_secs(parse_number(
            "DISCOVERY_TIMEOUT_SECS",
            optional("DISCOVERY_TIMEOUT_SECS"),
            10,
        )?);
        let discovery_port = optional("DISCOVERY_PORT")
            .map(|v| parse_number("DISCOVERY_PORT", Some(v), 0))
            .transpose()?;
        let test_timeout = Duration::from_secs(parse_number(
            "TEST_TIMEOUT_SECS",
            optional("TEST_TIMEOUT_SECS"),
            600,
        )?);

        let defaults = SuiteMarkers::default();
        let suite_markers = SuiteMarkers {
            pass: optional("TEST_PASS_MARKER").unwrap_or(defaults.pass),
            fail: optional("TEST_FAIL_MARKER").unwrap_or(defaults.fail),
        };

        Ok(Self {
            run_id: RunId::generate(),
            project_id,
            database_url,
            storage_bucket,
            app_id,
            auth_domain,
            api_key,
            runtime,
            runtime_version,
            admin_sdk_version,
            region,
            storage_region,
            debug,
            layout: Layout::new(sdk_root, harness_dir),
            sdk_package,
            deploy_tool,
            deploy_batch_size,
            deploy_concurrency,
            deploy_max_attempts,
            discovery_timeout,
            discovery_port,
            test_timeout,
            suite_markers,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &'static str, value: String, reason: &str| ConfigError::Invalid {
            name,
            value,
            reason: reason.to_string(),
        };

        if self.deploy_batch_size == 0 {
            return Err(invalid("DEPLOY_BATCH_SIZE", "0".into(), "must be greater than 0"));
        }
        if self.deploy_concurrency == 0 {
            return Err(invalid("DEPLOY_CONCURRENCY", "0".into(), "must be greater than 0"));
        }
        if self.deploy_max_attempts == 0 {
            return Err(invalid("DEPLOY_MAX_ATTEMPTS", "0".into(), "must be greater than 0"));
        }
        if self.discovery_timeout.is_zero() {
            return Err(invalid("DISCOVERY_TIMEOUT_SECS", "0".into(), "must be greater than 0"));
        }
        if self.test_timeout.is_zero() {
            return Err(invalid("TEST_TIMEOUT_SECS", "0".into(), "must be greater than 0"));
        }
        if self.discovery_port == Some(0) {
            return Err(invalid("DISCOVERY_PORT", "0".into(), "must be a fixed port"));
        }
        if self.suite_markers.pass == self.suite_markers.fail {
            return Err(invalid(
                "TEST_PASS_MARKER",
                self.suite_markers.pass.clone(),
                "must differ from TEST_FAIL_MARKER",
            ));
        }
        if self.sdk_package.contains('/') {
            return Err(invalid(
                "SDK_PACKAGE",
                self.sdk_package.clone(),
                "must be a bare package name",
            ));
        }

        Ok(())
    }

    /// Deployment limits derived from the configuration
    pub fn deploy_policy(&self) -> DeployPolicy {
        DeployPolicy {
            batch_size: self.deploy_batch_size,
            concurrency: self.deploy_concurrency,
            max_attempts: self.deploy_max_attempts,
            ..DeployPolicy::default()
        }
    }

    /// Variables exposed to the admin server and the test suite
    pub fn run_environment(&self) -> Vec<(String, String)> {
        [
            ("TEST_RUN_ID", self.run_id.as_str()),
            ("PROJECT_ID", self.project_id.as_str()),
            ("GCLOUD_PROJECT", self.project_id.as_str()),
            ("DATABASE_URL", self.database_url.as_str()),
            ("STORAGE_BUCKET", self.storage_bucket.as_str()),
            ("APP_ID", self.app_id.as_str()),
            ("AUTH_DOMAIN", self.auth_domain.as_str()),
            ("API_KEY", self.api_key.as_str()),
            ("TEST_RUNTIME", self.runtime.as_str()),
            ("REGION", self.region.as_str()),
            ("STORAGE_REGION", self.storage_region.as_str()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }
}

/// Interprets a boolean-ish flag value (`1`, `true`, `yes`, `on`)
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_number<T>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
