//! Test doubles shared by the runner's unit tests

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use gauntlet_client::{
    ClientError, DeleteOptions, DeployClient, DeployOptions, DeployedEndpoint, EndpointFilter,
    Result,
};
use gauntlet_core::{DiscoveredSpec, MANIFEST_FILE, Manifest, RunId, Runtime, TestResult};
use tokio_util::sync::CancellationToken;

use crate::config::Layout;
use crate::process::CommandSpec;
use crate::runtime::{ArtifactPattern, RuntimeDelegate};
use crate::service::discovery::{AdminServer, Discovery, DiscoveryError, DiscoveryService};
use crate::service::staging::{BuildError, StagedProject, StagingService};
use crate::service::suite::{SuiteService, TestExecutionError};

/// Scripted answer of one deploy call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    Ok,
    Transient,
    Permanent,
}

type DeployHook = Box<dyn Fn(usize) + Send + Sync>;

/// In-memory backend recording every call
///
/// Deployed names become visible to `list_endpoints` until deleted.
pub struct RecordingDeployClient {
    script: Mutex<VecDeque<Scripted>>,
    remote: Mutex<Vec<String>>,
    deploy_calls: Mutex<Vec<Vec<String>>>,
    delete_calls: Mutex<Vec<Vec<String>>>,
    list_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    delay: Duration,
    hook: Option<DeployHook>,
    fail_list: bool,
}

impl RecordingDeployClient {
    pub fn new() -> Self {
        Self::with_script(Vec::new())
    }

    /// Answers deploy calls from `script` in order, then succeeds
    pub fn with_script(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            remote: Mutex::new(Vec::new()),
            deploy_calls: Mutex::new(Vec::new()),
            delete_calls: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            delay: Duration::ZERO,
            hook: None,
            fail_list: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Calls `hook` with the 0-based index of each deploy call
    pub fn on_deploy(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn with_remote(self, names: &[&str]) -> Self {
        self.remote
            .lock()
            .unwrap()
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn deploy_calls(&self) -> Vec<Vec<String>> {
        self.deploy_calls.lock().unwrap().clone()
    }

    pub fn delete_calls(&self) -> Vec<Vec<String>> {
        self.delete_calls.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Most deploy calls ever running at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn remote(&self) -> Vec<String> {
        self.remote.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeployClient for RecordingDeployClient {
    async fn list_endpoints(&self, _filter: &EndpointFilter) -> Result<Vec<DeployedEndpoint>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list {
            return Err(ClientError::Transient("listing unavailable".to_string()));
        }
        Ok(self.remote().into_iter().map(DeployedEndpoint::new).collect())
    }

    async fn delete_endpoints(&self, names: &[String], _opts: &DeleteOptions) -> Result<()> {
        self.delete_calls.lock().unwrap().push(names.to_vec());
        self.remote.lock().unwrap().retain(|n| !names.contains(n));
        Ok(())
    }

    async fn deploy(&self, opts: &DeployOptions) -> Result<()> {
        let index = {
            let mut calls = self.deploy_calls.lock().unwrap();
            calls.push(opts.only.clone());
            calls.len() - 1
        };
        if let Some(hook) = &self.hook {
            hook(index);
        }
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let answer = self.script.lock().unwrap().pop_front().unwrap_or(Scripted::Ok);
        match answer {
            Scripted::Ok => {
                self.remote.lock().unwrap().extend(opts.only.iter().cloned());
                Ok(())
            }
            Scripted::Transient => Err(ClientError::Transient("Quota exceeded".to_string())),
            Scripted::Permanent => Err(ClientError::CommandFailed {
                command: "deploy".to_string(),
                code: Some(1),
                stderr: "Invalid function configuration".to_string(),
            }),
        }
    }
}

/// Delegate running shell one-liners instead of real toolchains
pub struct ScriptedDelegate {
    pub build: String,
    pub install: String,
    pub compile: String,
    pub admin: String,
}

impl Default for ScriptedDelegate {
    fn default() -> Self {
        Self {
            build: "mkdir -p out && echo sdk > out/pkg-1.0.0.tgz".to_string(),
            install: "mkdir -p node_modules/pkg && touch node_modules/pkg/index.js".to_string(),
            compile: "mkdir -p lib && touch lib/index.js".to_string(),
            admin: "sleep 30".to_string(),
        }
    }
}

impl RuntimeDelegate for ScriptedDelegate {
    fn runtime(&self) -> Runtime {
        Runtime::Node
    }

    fn package(&self) -> &str {
        "pkg"
    }

    fn build_commands(&self, layout: &Layout) -> Vec<CommandSpec> {
        vec![CommandSpec::shell(&self.build, &layout.sdk_root)]
    }

    fn artifact_pattern(&self, layout: &Layout) -> ArtifactPattern {
        ArtifactPattern {
            dir: layout.sdk_root.join("out"),
            prefix: "pkg-".to_string(),
            extension: "tgz",
        }
    }

    fn artifact_reference(&self, staged: &Path) -> String {
        format!("file:{}", staged.display())
    }

    fn stale_sdk_paths(&self, layout: &Layout) -> Vec<PathBuf> {
        vec![layout.functions_dir.join("node_modules").join("pkg")]
    }

    fn install_commands(&self, layout: &Layout) -> Vec<CommandSpec> {
        vec![CommandSpec::shell(&self.install, &layout.functions_dir)]
    }

    fn compile_commands(&self, layout: &Layout) -> Vec<CommandSpec> {
        vec![CommandSpec::shell(&self.compile, &layout.functions_dir)]
    }

    fn admin_server(&self, layout: &Layout, _port: u16) -> CommandSpec {
        CommandSpec::shell(&self.admin, &layout.functions_dir)
    }
}

/// Staging that succeeds without touching the filesystem
pub struct FakeStaging {
    pub fail: bool,
}

#[async_trait]
impl StagingService for FakeStaging {
    async fn stage(
        &self,
        _run_id: &RunId,
        _cancel: &CancellationToken,
    ) -> std::result::Result<StagedProject, BuildError> {
        if self.fail {
            return Err(BuildError::ArtifactMissing {
                dir: PathBuf::from("/nowhere"),
                pattern: "pkg-*.tgz".to_string(),
            });
        }
        Ok(StagedProject {
            artifact: PathBuf::from("/staged/pkg.tgz"),
            dependency_file: PathBuf::from("/staged/package.json"),
        })
    }
}

/// Discovery answering a fixed document, written under `dir`
pub struct FakeDiscovery {
    pub dir: PathBuf,
    pub yaml: String,
}

#[async_trait]
impl DiscoveryService for FakeDiscovery {
    async fn discover(
        &self,
        run_id: &RunId,
        _cancel: &CancellationToken,
    ) -> std::result::Result<Discovery, DiscoveryError> {
        let spec = DiscoveredSpec::from_yaml(&self.yaml)?;
        let manifest = Manifest::from_discovered(run_id, spec)?;
        let manifest_path = self.dir.join(MANIFEST_FILE);
        manifest.write(&manifest_path)?;

        Ok(Discovery {
            manifest,
            manifest_path,
            server: AdminServer::detached(),
        })
    }
}

/// Suite returning a fixed result
pub struct FakeSuite {
    pub result: TestResult,
    pub runs: AtomicUsize,
}

impl FakeSuite {
    pub fn new(result: TestResult) -> Self {
        Self {
            result,
            runs: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SuiteService for FakeSuite {
    async fn run(
        &self,
        _run_id: &RunId,
        _cancel: &CancellationToken,
    ) -> std::result::Result<TestResult, TestExecutionError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(self.result.clone())
    }
}
