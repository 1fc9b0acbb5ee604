//! Interrupt handling
//!
//! The first Ctrl+C or SIGTERM cancels the run so it can clean up. A second
//! signal while cleanup is still running exits immediately.

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::orchestrator::EXIT_INTERRUPTED;

struct Signals {
    #[cfg(unix)]
    interrupt: Option<signal::unix::Signal>,
    #[cfg(unix)]
    terminate: Option<signal::unix::Signal>,
}

#[cfg(unix)]
fn listen(kind: signal::unix::SignalKind, name: &str) -> Option<signal::unix::Signal> {
    match signal::unix::signal(kind) {
        Ok(stream) => Some(stream),
        Err(e) => {
            error!(error = %e, "failed to install {} handler", name);
            None
        }
    }
}

#[cfg(unix)]
async fn recv(stream: Option<&mut signal::unix::Signal>) {
    match stream {
        Some(stream) => {
            stream.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl Signals {
    /// Registers the handlers; signals arriving from here on are queued
    #[cfg(unix)]
    fn new() -> Self {
        use signal::unix::SignalKind;

        Self {
            interrupt: listen(SignalKind::interrupt(), "Ctrl+C"),
            terminate: listen(SignalKind::terminate(), "SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    fn new() -> Self {
        Self {}
    }

    /// Waits for the next signal and names it
    #[cfg(unix)]
    async fn next(&mut self) -> &'static str {
        tokio::select! {
            () = recv(self.interrupt.as_mut()) => "Ctrl+C",
            () = recv(self.terminate.as_mut()) => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    async fn next(&mut self) -> &'static str {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        "Ctrl+C"
    }
}

/// Spawns the listener driving `cancel`
///
/// Handlers are in place when this returns, before the listener first runs.
pub fn install(cancel: CancellationToken) -> JoinHandle<()> {
    let mut signals = Signals::new();

    tokio::spawn(async move {
        let first = signals.next().await;
        warn!("Received {}, cleaning up before exit", first);
        cancel.cancel();

        let second = signals.next().await;
        error!("Received {} during cleanup, exiting now", second);
        std::process::exit(i32::from(EXIT_INTERRUPTED));
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_before_listener_runs_is_not_lost() {
        let mut signals = Signals::new();

        nix::sys::signal::raise(nix::sys::signal::Signal::SIGTERM).unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), signals.next())
            .await
            .unwrap();
        assert_eq!(received, "SIGTERM");
    }
}
