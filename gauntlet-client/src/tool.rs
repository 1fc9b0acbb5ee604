//! Deploy-tool backed client
//!
//! Implements [`DeployClient`] by invoking the platform's deploy tool
//! (`firebase` by default) as a subprocess and reading its JSON output.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::deploy::{DeleteOptions, DeployClient, DeployOptions, DeployedEndpoint, EndpointFilter};
use crate::error::{ClientError, Result};

/// Time the tool gets between SIGTERM and SIGKILL when a call is abandoned
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Client that shells out to the deploy tool
#[derive(Debug, Clone)]
pub struct ToolDeployClient {
    /// Program name or path of the deploy tool
    program: String,
    /// Pass `--debug` so the tool writes its debug log
    debug: bool,
    grace_period: Duration,
}

/// JSON envelope the tool prints with `--json`
#[derive(Debug, Deserialize)]
struct ToolResponse<T> {
    status: String,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

impl ToolDeployClient {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            debug: false,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Runs the tool to completion and returns its stdout
    ///
    /// Dropping the returned future stops the tool's process group with
    /// SIGTERM, then SIGKILL once the grace period runs out.
    async fn invoke(&self, args: &[String], cwd: Option<&Path>) -> Result<String> {
        let mut args = args.to_vec();
        if self.debug {
            args.push("--debug".to_string());
        }
        let command_line = format!("{} {}", self.program, args.join(" "));
        debug!("Running deploy tool: {}", command_line);

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        // Own process group so termination reaches the tool's node workers
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|source| ClientError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let mut process = ToolProcess {
            child: Some(child),
            command: command_line.clone(),
            grace_period: self.grace_period,
        };

        let (status, stdout, stderr) = process.output().await.map_err(|source| ClientError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&stdout).to_string();
        let stderr = String::from_utf8_lossy(&stderr).to_string();

        if !status.success() {
            // The tool reports most failures on stdout when --json is set
            let detail = if stderr.trim().is_empty() { &stdout } else { &stderr };
            return Err(ClientError::from_command_failure(command_line, status.code(), detail));
        }

        Ok(stdout)
    }
}

/// A running deploy-tool invocation
///
/// Holds the child until it has been waited on. Dropped early, it hands the
/// child to a background task that terminates the whole group.
struct ToolProcess {
    child: Option<Child>,
    command: String,
    grace_period: Duration,
}

impl ToolProcess {
    async fn output(&mut self) -> std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
        let Some(child) = self.child.as_mut() else {
            return Err(std::io::Error::other("deploy tool already reaped"));
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (status, stdout, stderr) = tokio::join!(child.wait(), drain(stdout), drain(stderr));
        let status = status?;
        self.child = None;

        Ok((status, stdout?, stderr?))
    }
}

impl Drop for ToolProcess {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }

        debug!("Terminating abandoned '{}'", self.command);
        signal_group(&child, false);

        let command = std::mem::take(&mut self.command);
        let grace = self.grace_period;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if tokio::time::timeout(grace, child.wait()).await.is_err() {
                        warn!("'{}' did not exit within {:?}, killing", command, grace);
                        signal_group(&child, true);
                        let _ = child.kill().await;
                    }
                });
            }
            Err(_) => {
                signal_group(&child, true);
                let _ = child.start_kill();
            }
        }
    }
}

async fn drain<R>(stream: Option<R>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[cfg(unix)]
fn signal_group(child: &Child, force: bool) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        debug!("Failed to send {:?} to deploy tool group {}: {}", signal, pid, e);
    }
}

#[cfg(not(unix))]
fn signal_group(_child: &Child, _force: bool) {}

/// Parses the `--json` envelope of a listing call
fn parse_list_output(stdout: &str) -> Result<Vec<DeployedEndpoint>> {
    let response: ToolResponse<Vec<DeployedEndpoint>> = serde_json::from_str(stdout.trim())
        .map_err(|e| ClientError::ParseError(format!("Failed to parse endpoint list: {}", e)))?;

    if response.status != "success" {
        return Err(ClientError::from_command_failure(
            "functions:list",
            None,
            response.error.as_deref().unwrap_or("unknown error"),
        ));
    }

    Ok(response.result.unwrap_or_default())
}

/// Builds the `--only` selector for a deploy call
fn only_selector(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("functions:{}", n))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl DeployClient for ToolDeployClient {
    async fn list_endpoints(&self, filter: &EndpointFilter) -> Result<Vec<DeployedEndpoint>> {
        let args = vec![
            "functions:list".to_string(),
            "--json".to_string(),
            "--project".to_string(),
            filter.project.clone(),
        ];
        let stdout = self.invoke(&args, None).await?;
        let endpoints = parse_list_output(&stdout)?;

        Ok(match &filter.region {
            Some(region) => endpoints
                .into_iter()
                .filter(|e| e.region.as_deref().is_none_or(|r| r == region))
                .collect(),
            None => endpoints,
        })
    }

    async fn delete_endpoints(&self, names: &[String], opts: &DeleteOptions) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }

        let mut args = vec!["functions:delete".to_string()];
        args.extend(names.iter().cloned());
        args.push("--project".to_string());
        args.push(opts.project.clone());
        if let Some(region) = &opts.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        if opts.force {
            args.push("--force".to_string());
        }

        self.invoke(&args, None).await?;
        info!("Deleted {} endpoint(s)", names.len());
        Ok(())
    }

    async fn deploy(&self, opts: &DeployOptions) -> Result<()> {
        let mut args = vec![
            "deploy".to_string(),
            "--only".to_string(),
            only_selector(&opts.only),
            "--project".to_string(),
            opts.project.clone(),
            "--non-interactive".to_string(),
        ];
        if opts.force {
            args.push("--force".to_string());
        }

        self.invoke(&args, Some(&opts.cwd)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_output() {
        let stdout = r#"{
            "status": "success",
            "result": [
                {"id": "t1-httpFn", "region": "us-central1", "platform": "gcfv2"},
                {"id": "prodHandler", "region": "europe-west1"}
            ]
        }"#;

        let endpoints = parse_list_output(stdout).unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].name, "t1-httpFn");
        assert_eq!(endpoints[1].region.as_deref(), Some("europe-west1"));
    }

    #[test]
    fn test_parse_list_error_status() {
        let stdout = r#"{"status": "error", "error": "Failed to list functions"}"#;
        let err = parse_list_output(stdout).unwrap_err();
        assert!(matches!(err, ClientError::CommandFailed { .. }));
    }

    #[test]
    fn test_parse_list_garbage() {
        let err = parse_list_output("not json").unwrap_err();
        assert!(matches!(err, ClientError::ParseError(_)));
    }

    #[test]
    fn test_only_selector() {
        let names = vec!["t1-a".to_string(), "t1-b".to_string()];
        assert_eq!(only_selector(&names), "functions:t1-a,functions:t1-b");
    }

    async fn wait_for(path: &Path) -> bool {
        for _ in 0..100 {
            if path.exists() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_deploy_terminates_tool_group() {
        let dir = tempfile::tempdir().unwrap();
        // `sh deploy --only ...` runs the script named after the subcommand
        std::fs::write(
            dir.path().join("deploy"),
            "(trap 'touch worker.term; exit 0' TERM; touch worker.ready; \
               while :; do sleep 0.1; done) &\n\
             trap 'touch tool.term; exit 0' TERM\n\
             touch tool.ready\n\
             while :; do sleep 0.1; done\n",
        )
        .unwrap();

        let client = ToolDeployClient::new("sh").with_grace_period(Duration::from_secs(2));
        let opts = DeployOptions {
            project: "demo".to_string(),
            only: vec!["t1-httpFn".to_string()],
            cwd: dir.path().to_path_buf(),
            force: true,
        };

        tokio::select! {
            result = client.deploy(&opts) => panic!("deploy finished early: {result:?}"),
            ready = async {
                wait_for(&dir.path().join("tool.ready")).await
                    && wait_for(&dir.path().join("worker.ready")).await
            } => assert!(ready),
        }

        assert!(wait_for(&dir.path().join("tool.term")).await);
        assert!(wait_for(&dir.path().join("worker.term")).await);
    }

    #[tokio::test]
    async fn test_missing_tool_is_spawn_error() {
        let client = ToolDeployClient::new("gauntlet-nonexistent-tool-12345");
        let filter = EndpointFilter {
            project: "demo".to_string(),
            region: None,
        };
        let err = client.list_endpoints(&filter).await.unwrap_err();
        assert!(matches!(err, ClientError::Spawn { .. }));
        assert!(!err.is_transient());
    }
}
