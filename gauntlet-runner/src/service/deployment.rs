//! Deployment driver
//!
//! Deploys the rewritten endpoint set in fixed-size batches through a
//! bounded worker pool. Each batch is retried with exponential backoff while
//! the backend reports transient failures. The first batch that fails for
//! good aborts every batch that has not started yet.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gauntlet_client::{ClientError, DeployClient, DeployOptions};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Limits of a deployment pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployPolicy {
    /// Endpoints per deploy call
    pub batch_size: usize,
    /// Deploy calls in flight at once
    pub concurrency: usize,
    /// Attempts per batch, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for DeployPolicy {
    fn default() -> Self {
        Self {
            batch_size: 8,
            concurrency: 2,
            max_attempts: 4,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl DeployPolicy {
    /// Delay before retry number `retry` (0-based): `initial * 2^retry`, capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Where endpoints are deployed from and to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTarget {
    pub project: String,
    /// Function project directory the deploy tool runs in
    pub cwd: PathBuf,
}

/// Result of a successful deployment pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploySummary {
    pub batches: usize,
    pub deployed: Vec<String>,
    /// Deploy calls issued across all batches
    pub calls: u32,
}

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("batch {batch} failed after {attempts} attempt(s), {} endpoint(s) not deployed: {source}", .undeployed.len())]
    Failed {
        batch: usize,
        attempts: u32,
        undeployed: Vec<String>,
        #[source]
        source: ClientError,
    },

    #[error("deploy worker panicked: {message}")]
    WorkerPanicked {
        undeployed: Vec<String>,
        message: String,
    },

    #[error("deployment cancelled, {} endpoint(s) not deployed", .undeployed.len())]
    Cancelled { undeployed: Vec<String> },
}

impl DeploymentError {
    /// Endpoints not confirmed deployed when the pass stopped
    pub fn undeployed(&self) -> &[String] {
        match self {
            Self::Failed { undeployed, .. }
            | Self::WorkerPanicked { undeployed, .. }
            | Self::Cancelled { undeployed } => undeployed,
        }
    }
}

/// Splits names into consecutive batches of at most `batch_size`
pub fn partition(names: &[String], batch_size: usize) -> Vec<Vec<String>> {
    names
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

enum BatchOutcome {
    Deployed { attempts: u32 },
    Failed { attempts: u32, source: ClientError },
    /// Skipped or stopped between attempts after an abort
    Aborted { attempts: u32 },
    Interrupted { attempts: u32 },
}

struct BatchReport {
    index: usize,
    names: Vec<String>,
    outcome: BatchOutcome,
}

/// Drives batched, retried deployment through a [`DeployClient`]
pub struct DeploymentDriver {
    client: Arc<dyn DeployClient>,
    policy: DeployPolicy,
}

impl DeploymentDriver {
    pub fn new(client: Arc<dyn DeployClient>, policy: DeployPolicy) -> Self {
        Self { client, policy }
    }

    /// Deploys every name, or reports the names left undeployed
    pub async fn deploy(
        &self,
        names: &[String],
        target: &DeployTarget,
        cancel: &CancellationToken,
    ) -> Result<DeploySummary, DeploymentError> {
        let batches = partition(names, self.policy.batch_size);
        info!(
            endpoints = names.len(),
            batches = batches.len(),
            concurrency = self.policy.concurrency,
            "Deploying endpoints"
        );

        if batches.is_empty() {
            return Ok(DeploySummary::default());
        }

        // Cancelled on the first fatal batch failure, and by the caller's token
        let abort = cancel.child_token();
        let permits = Arc::new(Semaphore::new(self.policy.concurrency.max(1)));
        let mut workers = JoinSet::new();

        for (index, batch) in batches.iter().enumerate() {
            let task = BatchTask {
                index,
                names: batch.clone(),
                client: self.client.clone(),
                policy: self.policy.clone(),
                target: target.clone(),
                abort: abort.clone(),
                cancel: cancel.clone(),
            };
            let permits = permits.clone();

            workers.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    () = task.abort.cancelled() => None,
                    permit = permits.acquire_owned() => permit.ok(),
                };

                let outcome = match permit {
                    Some(permit) => {
                        let outcome = task.run().await;
                        // Abort before the permit passes to a waiting batch
                        if matches!(outcome, BatchOutcome::Failed { .. }) {
                            task.abort.cancel();
                        }
                        drop(permit);
                        outcome
                    }
                    None => BatchOutcome::Aborted { attempts: 0 },
                };

                BatchReport {
                    index: task.index,
                    names: task.names,
                    outcome,
                }
            });
        }

        let mut deployed: HashSet<String> = HashSet::new();
        let mut calls = 0u32;
        let mut failure: Option<(usize, u32, ClientError)> = None;
        let mut panic_message: Option<String> = None;

        while let Some(joined) = workers.join_next().await {
            let report = match joined {
                Ok(report) => report,
                Err(e) => {
                    error!("Deploy worker failed: {}", e);
                    abort.cancel();
                    panic_message.get_or_insert_with(|| e.to_string());
                    continue;
                }
            };

            match report.outcome {
                BatchOutcome::Deployed { attempts } => {
                    calls += attempts;
                    info!(batch = report.index, endpoints = report.names.len(), "Batch deployed");
                    deployed.extend(report.names);
                }
                BatchOutcome::Failed { attempts, source } => {
                    calls += attempts;
                    error!(batch = report.index, attempts, "Batch failed: {}", source);
                    abort.cancel();
                    if failure.is_none() {
                        failure = Some((report.index, attempts, source));
                    }
                }
                BatchOutcome::Aborted { attempts } | BatchOutcome::Interrupted { attempts } => {
                    calls += attempts;
                    debug!(batch = report.index, "Batch not deployed");
                }
            }
        }

        let undeployed: Vec<String> = names
            .iter()
            .filter(|name| !deployed.contains(*name))
            .cloned()
            .collect();

        if cancel.is_cancelled() {
            warn!(undeployed = undeployed.len(), "Deployment cancelled");
            return Err(DeploymentError::Cancelled { undeployed });
        }

        if let Some((batch, attempts, source)) = failure {
            return Err(DeploymentError::Failed {
                batch,
                attempts,
                undeployed,
                source,
            });
        }

        if let Some(message) = panic_message {
            return Err(DeploymentError::WorkerPanicked {
                undeployed,
                message,
            });
        }

        info!(endpoints = names.len(), calls, "All endpoints deployed");
        Ok(DeploySummary {
            batches: batches.len(),
            deployed: names.to_vec(),
            calls,
        })
    }
}

struct BatchTask {
    index: usize,
    names: Vec<String>,
    client: Arc<dyn DeployClient>,
    policy: DeployPolicy,
    target: DeployTarget,
    abort: CancellationToken,
    cancel: CancellationToken,
}

impl BatchTask {
    async fn run(&self) -> BatchOutcome {
        let opts = DeployOptions {
            project: self.target.project.clone(),
            only: self.names.clone(),
            cwd: self.target.cwd.clone(),
            force: true,
        };

        let mut attempts = 0u32;
        loop {
            if self.abort.is_cancelled() {
                return BatchOutcome::Aborted { attempts };
            }

            attempts += 1;
            debug!(batch = self.index, attempt = attempts, "Deploying batch");

            // An in-flight call is only interrupted by the caller, never by
            // a sibling batch failing
            let result = tokio::select! {
                result = self.client.deploy(&opts) => result,
                () = self.cancel.cancelled() => return BatchOutcome::Interrupted { attempts },
            };

            let source = match result {
                Ok(()) => return BatchOutcome::Deployed { attempts },
                Err(e) => e,
            };

            if !source.is_transient() || attempts >= self.policy.max_attempts {
                return BatchOutcome::Failed { attempts, source };
            }

            let delay = self.policy.backoff(attempts - 1);
            warn!(
                batch = self.index,
                attempt = attempts,
                "Transient deploy failure, retrying in {:?}: {}",
                delay,
                source
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.abort.cancelled() => return BatchOutcome::Aborted { attempts },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingDeployClient, Scripted};

    fn names(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("t1700000000000-fn{}", i)).collect()
    }

    fn fast_policy(batch_size: usize, concurrency: usize) -> DeployPolicy {
        DeployPolicy {
            batch_size,
            concurrency,
            max_attempts: 4,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    fn target() -> DeployTarget {
        DeployTarget {
            project: "demo-project".to_string(),
            cwd: PathBuf::from("/tmp/functions"),
        }
    }

    #[test]
    fn test_partition_covers_every_name_once() {
        let all = names(17);
        let batches = partition(&all, 8);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![8, 8, 1]);
        assert_eq!(batches.concat(), all);

        assert!(partition(&[], 8).is_empty());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = DeployPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(2));
        assert_eq!(policy.backoff(1), Duration::from_secs(4));
        assert_eq!(policy.backoff(2), Duration::from_secs(8));
        assert_eq!(policy.backoff(10), Duration::from_secs(60));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_deploy_issues_one_call_per_batch() {
        let client = Arc::new(RecordingDeployClient::new());
        let driver = DeploymentDriver::new(client.clone(), fast_policy(4, 2));
        let all = names(10);

        let summary = driver
            .deploy(&all, &target(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.calls, 3);

        let calls = client.deploy_calls();
        assert_eq!(calls.len(), 3);
        let mut seen: Vec<String> = calls.concat();
        seen.sort();
        let mut expected = all.clone();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_in_flight_calls_never_exceed_concurrency() {
        let client = Arc::new(RecordingDeployClient::new().with_delay(Duration::from_millis(50)));
        let driver = DeploymentDriver::new(client.clone(), fast_policy(1, 2));

        let summary = driver
            .deploy(&names(10), &target(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.batches, 10);
        assert_eq!(client.deploy_calls().len(), 10);
        assert_eq!(client.peak_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let client = Arc::new(RecordingDeployClient::with_script(vec![
            Scripted::Transient,
            Scripted::Transient,
            Scripted::Ok,
        ]));
        let driver = DeploymentDriver::new(client.clone(), fast_policy(8, 1));

        let summary = driver
            .deploy(&names(3), &target(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.calls, 3);
        assert_eq!(client.deploy_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let client = Arc::new(RecordingDeployClient::with_script(vec![Scripted::Permanent]));
        let driver = DeploymentDriver::new(client.clone(), fast_policy(8, 1));
        let all = names(3);

        let err = driver
            .deploy(&all, &target(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(client.deploy_calls().len(), 1);
        match err {
            DeploymentError::Failed {
                attempts,
                undeployed,
                ..
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(undeployed, all);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retries_exhausted_reports_undeployed() {
        let client = Arc::new(RecordingDeployClient::with_script(vec![
            Scripted::Ok,
            Scripted::Transient,
            Scripted::Transient,
            Scripted::Transient,
            Scripted::Transient,
        ]));
        let driver = DeploymentDriver::new(client.clone(), fast_policy(2, 1));
        let all = names(6);

        let err = driver
            .deploy(&all, &target(), &CancellationToken::new())
            .await
            .unwrap_err();

        // First batch lands, second exhausts its attempts, third never starts
        assert_eq!(client.deploy_calls().len(), 5);
        assert_eq!(err.undeployed(), &all[2..]);
    }

    #[tokio::test]
    async fn test_cancel_during_deploy() {
        let cancel = CancellationToken::new();
        let hook = cancel.clone();
        let client = Arc::new(
            RecordingDeployClient::new()
                .with_delay(Duration::from_secs(30))
                .on_deploy(move |_| hook.cancel()),
        );
        let driver = DeploymentDriver::new(client.clone(), fast_policy(2, 1));

        let err = driver.deploy(&names(4), &target(), &cancel).await.unwrap_err();

        assert!(matches!(err, DeploymentError::Cancelled { .. }));
        assert_eq!(err.undeployed().len(), 4);
        assert_eq!(client.deploy_calls().len(), 1);
    }
}
