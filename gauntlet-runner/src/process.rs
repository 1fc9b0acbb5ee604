//! Subprocess control
//!
//! Every external step of a run (build, install, admin server, test suite)
//! is a child process owned by the stage that spawned it. Children run in
//! their own process group, have stdout and stderr drained concurrently by
//! reader tasks, and are stopped with SIGTERM escalating to SIGKILL.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Time a child gets between SIGTERM and SIGKILL
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How long to wait for stream readers after the child is gone
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A command to run, with an explicit working directory
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    /// Hard ceiling on run time; `None` waits indefinitely
    pub timeout: Option<Duration>,
    pub grace_period: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
            timeout: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Shell one-liner, run with `sh -c`
    pub fn shell(script: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self::new("sh", cwd).arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(vars);
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Human-readable command line for logs and errors
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Output captured from a finished child
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` when the child was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Both streams interleaved in arrival order
    pub combined: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last lines of the combined output, for error messages
    pub fn tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.combined.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Errors running a child process
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' timed out after {limit:?}")]
    TimedOut {
        command: String,
        limit: Duration,
        output: ProcessOutput,
    },

    #[error("'{command}' was cancelled")]
    Cancelled { command: String },

    #[error("'{command}' exited with code {code:?}: {tail}")]
    Failed {
        command: String,
        code: Option<i32>,
        tail: String,
        output: ProcessOutput,
    },
}

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Default)]
struct Captured {
    stdout: String,
    stderr: String,
    combined: String,
}

impl Captured {
    fn push(&mut self, kind: StreamKind, line: &str) {
        let target = match kind {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        };
        target.push_str(line);
        target.push('\n');
        self.combined.push_str(line);
        self.combined.push('\n');
    }
}

/// A running child with its output readers
///
/// The child is killed if the handle is dropped without being waited on.
pub struct ManagedChild {
    child: Child,
    command: String,
    grace_period: Duration,
    capture: Arc<Mutex<Captured>>,
    readers: Vec<JoinHandle<()>>,
}

impl ManagedChild {
    /// Spawns the command with piped output
    pub fn spawn(spec: &CommandSpec) -> Result<Self, ProcessError> {
        let command = spec.display();
        debug!("Spawning '{}' in {}", command, spec.cwd.display());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        // Own process group so termination reaches grandchildren (npm -> node)
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            command: command.clone(),
            source,
        })?;

        let capture = Arc::new(Mutex::new(Captured::default()));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, StreamKind::Stdout, capture.clone(), command.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, StreamKind::Stderr, capture.clone(), command.clone()));
        }

        Ok(Self {
            child,
            command,
            grace_period: spec.grace_period,
            capture,
            readers,
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns the exit status if the child has already exited
    pub fn try_exited(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Waits for the child to exit on its own
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Stops the child: SIGTERM to its group, SIGKILL after the grace period
    pub async fn terminate(mut self) -> ProcessOutput {
        let status = match self.child.try_wait() {
            Ok(Some(status)) => Some(status),
            _ => {
                debug!("Terminating '{}'", self.command);
                self.signal_group(false);

                match tokio::time::timeout(self.grace_period, self.child.wait()).await {
                    Ok(Ok(status)) => Some(status),
                    Ok(Err(e)) => {
                        warn!("Error waiting for '{}': {}", self.command, e);
                        None
                    }
                    Err(_) => {
                        warn!(
                            "'{}' did not exit within {:?}, killing",
                            self.command, self.grace_period
                        );
                        self.signal_group(true);
                        let _ = self.child.kill().await;
                        None
                    }
                }
            }
        };

        self.finish(status).await
    }

    /// Collects the captured output once the child is gone
    async fn finish(mut self, status: Option<ExitStatus>) -> ProcessOutput {
        for reader in self.readers.drain(..) {
            let abort = reader.abort_handle();
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
                // A grandchild still holds the pipe open
                abort.abort();
            }
        }

        let captured = match self.capture.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        ProcessOutput {
            exit_code: status.and_then(|s| s.code()),
            stdout: captured.stdout,
            stderr: captured.stderr,
            combined: captured.combined,
        }
    }

    #[cfg(unix)]
    fn signal_group(&self, force: bool) {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return;
        };
        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
            debug!("Failed to send {:?} to '{}': {}", signal, self.command, e);
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&mut self, _force: bool) {
        let _ = self.child.start_kill();
    }
}

fn spawn_reader<R>(
    stream: R,
    kind: StreamKind,
    capture: Arc<Mutex<Captured>>,
    command: String,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(command = %command, stream = kind.as_str(), "read failed: {}", e);
                    break;
                }
            }

            // Invalid UTF-8 is replaced, never a reason to stop draining
            let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw);
            debug!(command = %command, stream = kind.as_str(), "{}", line);
            if let Ok(mut guard) = capture.lock() {
                guard.push(kind, &line);
            }
        }
    })
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut(Duration),
    Cancelled,
}

/// Runs a command to completion
///
/// Returns the captured output for any exit code. Expiry of the command's
/// timeout and cancellation both terminate the child.
pub async fn run(spec: &CommandSpec, cancel: &CancellationToken) -> Result<ProcessOutput, ProcessError> {
    let mut child = ManagedChild::spawn(spec)?;

    let waited = {
        let deadline = async {
            match spec.timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending::<Duration>().await,
            }
        };

        tokio::select! {
            status = child.wait() => Waited::Exited(status),
            limit = deadline => Waited::TimedOut(limit),
            () = cancel.cancelled() => Waited::Cancelled,
        }
    };

    let command = child.command().to_string();
    match waited {
        Waited::Exited(Ok(status)) => Ok(child.finish(Some(status)).await),
        Waited::Exited(Err(source)) => {
            child.terminate().await;
            Err(ProcessError::Wait { command, source })
        }
        Waited::TimedOut(limit) => {
            warn!("'{}' timed out after {:?}", command, limit);
            let output = child.terminate().await;
            Err(ProcessError::TimedOut {
                command,
                limit,
                output,
            })
        }
        Waited::Cancelled => {
            warn!("'{}' cancelled", command);
            child.terminate().await;
            Err(ProcessError::Cancelled { command })
        }
    }
}

/// Runs a command to completion and fails on a non-zero exit
pub async fn run_checked(
    spec: &CommandSpec,
    cancel: &CancellationToken,
) -> Result<ProcessOutput, ProcessError> {
    let output = run(spec, cancel).await?;
    if !output.success() {
        return Err(ProcessError::Failed {
            command: spec.display(),
            code: output.exit_code,
            tail: output.tail(20),
            output,
        });
    }
    Ok(output)
}

/// Removes a file or directory tree, treating "already gone" as success
///
/// Returns whether anything was removed.
pub fn remove_path(path: &Path) -> std::io::Result<bool> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    let result = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
