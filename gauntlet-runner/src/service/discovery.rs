//! Discovery service
//!
//! Serves the staged function project through the runtime's admin server,
//! polls it for the declared endpoint set, rewrites every endpoint under the
//! run identifier and persists the result as the deployment manifest.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gauntlet_client::{AdminClient, ClientError};
use gauntlet_core::{DiscoveredSpec, MANIFEST_FILE, Manifest, ManifestError, RewriteError, RunId};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Layout;
use crate::process::{ManagedChild, ProcessError};
use crate::runtime::RuntimeDelegate;

/// Delay between introspection attempts
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long a stopping admin server may take to exit after the quit request
const QUIT_WAIT: Duration = Duration::from_secs(2);

/// Servers started on a picked port before a bind race becomes an error
const PORT_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to acquire a loopback port: {0}")]
    Port(#[source] std::io::Error),

    #[error("failed to start admin server: {0}")]
    Spawn(#[source] ProcessError),

    #[error("admin server exited early with code {code:?}: {output}")]
    ServerExited { code: Option<i32>, output: String },

    #[error("admin server did not answer within {limit:?}")]
    Timeout { limit: Duration },

    #[error("introspection failed: {0}")]
    Introspection(#[source] ClientError),

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("discovery cancelled")]
    Cancelled,
}

/// A running admin server, stopped explicitly by its owner
pub struct AdminServer {
    client: AdminClient,
    child: Option<ManagedChild>,
}

impl std::fmt::Debug for AdminServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminServer")
            .field("command", &self.child.as_ref().map(ManagedChild::command))
            .finish()
    }
}

impl AdminServer {
    pub fn new(client: AdminClient, child: ManagedChild) -> Self {
        Self {
            client,
            child: Some(child),
        }
    }

    /// A handle with no process behind it
    pub fn detached() -> Self {
        Self {
            client: AdminClient::for_port(0),
            child: None,
        }
    }

    /// Asks the server to quit, then terminates whatever is left
    pub async fn stop(self) {
        let Some(mut child) = self.child else {
            return;
        };

        match tokio::time::timeout(QUIT_WAIT, self.client.quit()).await {
            Ok(Ok(())) => {
                debug!("Admin server acknowledged quit");
                let _ = tokio::time::timeout(QUIT_WAIT, child.wait()).await;
            }
            Ok(Err(e)) => debug!("Quit request failed: {}", e),
            Err(_) => debug!("Quit request timed out"),
        }

        let output = child.terminate().await;
        debug!("Admin server stopped with code {:?}", output.exit_code);
    }
}

/// Outcome of a discovery pass
#[derive(Debug)]
pub struct Discovery {
    pub manifest: Manifest,
    pub manifest_path: PathBuf,
    /// Still running; the caller stops it once the manifest is read back
    pub server: AdminServer,
}

/// Service trait for endpoint discovery
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    async fn discover(&self, run_id: &RunId, cancel: &CancellationToken) -> Result<Discovery, DiscoveryError>;
}

/// Discovers through the runtime's own admin server
pub struct StandardDiscoveryService {
    delegate: Arc<dyn RuntimeDelegate>,
    layout: Layout,
    timeout: Duration,
    port: Option<u16>,
    env: Vec<(String, String)>,
}

impl StandardDiscoveryService {
    pub fn new(delegate: Arc<dyn RuntimeDelegate>, layout: Layout, timeout: Duration) -> Self {
        Self {
            delegate,
            layout,
            timeout,
            port: None,
            env: Vec::new(),
        }
    }

    /// Serves on `port` instead of a free one
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    /// Extra environment of the admin server
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }
}

enum PollFailure {
    Exited(Option<i32>),
    Introspection(ClientError),
    Timeout,
    Cancelled,
}

async fn poll_spec(child: &mut ManagedChild, client: &AdminClient) -> Result<DiscoveredSpec, PollFailure> {
    let mut attempt = 0u32;
    loop {
        if let Some(status) = child.try_exited() {
            return Err(PollFailure::Exited(status.code()));
        }

        attempt += 1;
        match client.fetch_spec().await {
            Ok(spec) => {
                debug!("Admin server answered after {} attempt(s)", attempt);
                return Ok(spec);
            }
            Err(e @ ClientError::RequestFailed(_)) => debug!("Admin server not ready: {}", e),
            Err(e) if e.is_transient() => debug!("Admin server not ready: {}", e),
            Err(e) => return Err(PollFailure::Introspection(e)),
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Asks the OS for an unused loopback port
///
/// The port is released before the admin server binds it, so another
/// process can take it in between. `discover` retries that case.
pub fn free_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Whether server output reports a lost bind race
fn address_in_use(output: &str) -> bool {
    let lowered = output.to_lowercase();
    lowered.contains("eaddrinuse") || lowered.contains("address already in use")
}

impl StandardDiscoveryService {
    /// Starts the admin server on `port` and polls it for the endpoint set
    async fn serve(
        &self,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<(DiscoveredSpec, ManagedChild, AdminClient), DiscoveryError> {
        let command = self
            .delegate
            .admin_server(&self.layout, port)
            .envs(self.env.iter().cloned());
        info!(port, "Starting admin server: {}", command.display());

        let mut child = ManagedChild::spawn(&command).map_err(DiscoveryError::Spawn)?;
        let client = AdminClient::for_port(port);

        let polled = tokio::select! {
            polled = tokio::time::timeout(self.timeout, poll_spec(&mut child, &client)) => {
                polled.unwrap_or(Err(PollFailure::Timeout))
            }
            () = cancel.cancelled() => Err(PollFailure::Cancelled),
        };

        match polled {
            Ok(spec) => Ok((spec, child, client)),
            Err(failure) => {
                let output = child.terminate().await;
                Err(match failure {
                    PollFailure::Exited(code) => {
                        warn!("Admin server exited with code {:?}", code);
                        DiscoveryError::ServerExited {
                            code,
                            output: output.tail(20),
                        }
                    }
                    PollFailure::Introspection(e) => DiscoveryError::Introspection(e),
                    PollFailure::Timeout => DiscoveryError::Timeout { limit: self.timeout },
                    PollFailure::Cancelled => DiscoveryError::Cancelled,
                })
            }
        }
    }
}

#[async_trait]
impl DiscoveryService for StandardDiscoveryService {
    async fn discover(&self, run_id: &RunId, cancel: &CancellationToken) -> Result<Discovery, DiscoveryError> {
        let mut attempt = 1;
        let (spec, child, client) = loop {
            let port = match self.port {
                Some(port) => port,
                None => free_port().map_err(DiscoveryError::Port)?,
            };

            match self.serve(port, cancel).await {
                Err(DiscoveryError::ServerExited { output, .. })
                    if self.port.is_none() && attempt < PORT_ATTEMPTS && address_in_use(&output) =>
                {
                    warn!(port, attempt, "Admin server lost the port, picking another");
                    attempt += 1;
                }
                served => break served?,
            }
        };

        let server = AdminServer::new(client, child);
        let persisted = Manifest::from_discovered(run_id, spec)
            .map_err(DiscoveryError::from)
            .and_then(|manifest| {
                let path = self.layout.functions_dir.join(MANIFEST_FILE);
                manifest.write(&path)?;
                Ok((manifest, path))
            });

        match persisted {
            Ok((manifest, manifest_path)) => {
                info!(
                    endpoints = manifest.endpoints.len(),
                    "Wrote manifest {}",
                    manifest_path.display()
                );
                Ok(Discovery {
                    manifest,
                    manifest_path,
                    server,
                })
            }
            Err(e) => {
                server.stop().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDelegate;
    use axum::{Router, routing::get};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DISCOVERED: &str = r#"
endpoints:
  httpFn:
    platform: gcfv2
    httpsTrigger: {}
    project: demo
    runtime: nodejs18
  pubsubFn:
    platform: gcfv2
    eventTrigger:
      eventType: google.cloud.pubsub.topic.v1.messagePublished
specVersion: v1alpha1
requiredAPIs: []
"#;

    async fn serve(app: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        port
    }

    fn layout() -> (tempfile::TempDir, Layout) {
        let root = tempfile::tempdir().unwrap();
        let layout = Layout::new(root.path(), root.path().join("integration_test"));
        std::fs::create_dir_all(&layout.functions_dir).unwrap();
        (root, layout)
    }

    fn service(admin: &str, layout: &Layout, timeout: Duration) -> StandardDiscoveryService {
        let delegate = ScriptedDelegate {
            admin: admin.to_string(),
            ..ScriptedDelegate::default()
        };
        StandardDiscoveryService::new(Arc::new(delegate), layout.clone(), timeout)
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_discover_rewrites_and_persists() {
        let quits = Arc::new(AtomicUsize::new(0));
        let counter = quits.clone();
        let app = Router::new()
            .route("/__/functions.yaml", get(|| async { DISCOVERED }))
            .route(
                "/__/quitquitquit",
                get(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { "ok" }
                }),
            );
        let port = serve(app).await;
        let (_root, layout) = layout();

        let run_id = RunId::from_millis(1_700_000_000_000);
        let discovery = service("sleep 30", &layout, Duration::from_secs(5))
            .with_port(Some(port))
            .discover(&run_id, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            discovery.manifest.names(),
            vec!["t1700000000000-httpFn", "t1700000000000-pubsubFn"]
        );
        assert_eq!(discovery.manifest_path, layout.functions_dir.join("functions.yaml"));

        let on_disk = Manifest::load(&discovery.manifest_path).unwrap();
        assert_eq!(on_disk, discovery.manifest);
        assert!(!on_disk.endpoints["t1700000000000-httpFn"].contains_key("project"));

        discovery.server.stop().await;
        assert_eq!(quits.load(Ordering::SeqCst), 1);
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_server_exiting_early() {
        let (_root, layout) = layout();
        let err = service("echo boom; exit 3", &layout, Duration::from_secs(5))
            .discover(&RunId::from_millis(1), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            DiscoveryError::ServerExited { code, output } => {
                assert_eq!(code, Some(3));
                assert!(output.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    const BIND_RACE: &str =
        "echo x >> attempts; echo 'Error: listen EADDRINUSE: address already in use'; exit 1";

    fn attempts(layout: &Layout) -> usize {
        std::fs::read_to_string(layout.functions_dir.join("attempts"))
            .unwrap()
            .lines()
            .count()
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_lost_port_is_retried_on_another() {
        let (_root, layout) = layout();
        let script = "if [ -e attempts ]; then echo second; exit 4; fi; \
                      echo x >> attempts; echo 'listen EADDRINUSE'; exit 1";
        let err = service(script, &layout, Duration::from_secs(5))
            .discover(&RunId::from_millis(1), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            DiscoveryError::ServerExited { code, output } => {
                assert_eq!(code, Some(4));
                assert!(output.contains("second"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_lost_port_retries_are_bounded() {
        let (_root, layout) = layout();
        let err = service(BIND_RACE, &layout, Duration::from_secs(5))
            .discover(&RunId::from_millis(1), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DiscoveryError::ServerExited { code: Some(1), .. }));
        assert_eq!(attempts(&layout), PORT_ATTEMPTS as usize);
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_fixed_port_is_not_retried() {
        let (_root, layout) = layout();
        let port = free_port().unwrap();
        let err = service(BIND_RACE, &layout, Duration::from_secs(5))
            .with_port(Some(port))
            .discover(&RunId::from_millis(1), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DiscoveryError::ServerExited { .. }));
        assert_eq!(attempts(&layout), 1);
    }

    #[test]
    fn test_address_in_use_detection() {
        assert!(address_in_use("Error: listen EADDRINUSE: address already in use :::8080"));
        assert!(address_in_use("OSError: [Errno 98] Address already in use"));
        assert!(!address_in_use("SyntaxError: unexpected token"));
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_discovery_timeout() {
        let (_root, layout) = layout();
        let err = service("sleep 30", &layout, Duration::from_millis(300))
            .discover(&RunId::from_millis(1), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DiscoveryError::Timeout { .. }));
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_name_too_long_writes_nothing() {
        let long_name = "f".repeat(90);
        let yaml = format!("endpoints:\n  {}:\n    platform: gcfv2\n", long_name);
        let app = Router::new()
            .route("/__/functions.yaml", get(move || async move { yaml }))
            .route("/__/quitquitquit", get(|| async { "ok" }));
        let port = serve(app).await;
        let (_root, layout) = layout();

        let err = service("sleep 30", &layout, Duration::from_secs(5))
            .with_port(Some(port))
            .discover(&RunId::from_millis(1_700_000_000_000), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DiscoveryError::Rewrite(RewriteError::NameTooLong { .. })));
        assert!(!layout.functions_dir.join("functions.yaml").exists());
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_discovery_cancelled() {
        let (_root, layout) = layout();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = service("sleep 30", &layout, Duration::from_secs(5))
            .discover(&RunId::from_millis(1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Cancelled));
    }
}
