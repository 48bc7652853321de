//! Waiting for the network and the explorer to catch up after a deployment.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::DeployError;

/// How long to hold the pipeline after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum WaitPolicy {
    /// Continue immediately.
    Skip,
    /// Sleep for a fixed number of seconds.
    Fixed { seconds: u64 },
    /// Poll until the contract is visible, backing off exponentially.
    ///
    /// When `max_attempts` polls fail the run continues with a warning.
    Poll {
        min_delay_ms: u64,
        max_delay_secs: u64,
        max_attempts: usize,
    },
}

impl WaitPolicy {
    /// Poll policy for a single contract deployment.
    pub fn template() -> Self {
        WaitPolicy::Poll {
            min_delay_ms: 2_000,
            max_delay_secs: 15,
            max_attempts: 6,
        }
    }

    /// Poll policy for a proxy deployment; the implementation and the proxy both
    /// have to be indexed, so it waits longer.
    pub fn proxy() -> Self {
        WaitPolicy::Poll {
            min_delay_ms: 2_000,
            max_delay_secs: 20,
            max_attempts: 8,
        }
    }

    fn backoff(min_delay_ms: u64, max_delay_secs: u64, max_attempts: usize) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(min_delay_ms))
            .with_max_delay(Duration::from_secs(max_delay_secs))
            .with_max_times(max_attempts)
    }
}

/// Wait policies per stage kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// After a template or any single contract deployment.
    pub template: WaitPolicy,
    /// After a factory (implementation + proxy) deployment.
    pub proxy: WaitPolicy,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            template: WaitPolicy::template(),
            proxy: WaitPolicy::proxy(),
        }
    }
}

impl ConfirmationConfig {
    /// The fixed delays the manual rollout used: 30s after a contract, 60s after a proxy.
    pub fn fixed() -> Self {
        Self {
            template: WaitPolicy::Fixed { seconds: 30 },
            proxy: WaitPolicy::Fixed { seconds: 60 },
        }
    }

    pub fn skip() -> Self {
        Self {
            template: WaitPolicy::Skip,
            proxy: WaitPolicy::Skip,
        }
    }
}

/// Suspends the pipeline after a stage until its result is observable.
///
/// The wait can be interrupted through a cancellation flag; a cancelled wait
/// aborts the run.
#[derive(Debug, Clone, Default)]
pub struct ConfirmationWaiter {
    cancel: Option<watch::Receiver<bool>>,
}

impl ConfirmationWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort waits once `cancel` turns `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Wait after `stage` according to `policy`.
    ///
    /// `condition` is only used by [`WaitPolicy::Poll`]; it returns `Ok(true)` once
    /// the awaited state is visible.
    pub async fn wait<F, Fut>(
        &self,
        stage: &str,
        policy: &WaitPolicy,
        condition: F,
    ) -> Result<(), DeployError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<bool>>,
    {
        let waiting = wait_for_policy(stage, policy, condition);

        let Some(cancel) = &self.cancel else {
            waiting.await;
            return Ok(());
        };

        tokio::select! {
            _ = waiting => Ok(()),
            _ = cancelled(cancel.clone()) => {
                tracing::warn!(stage, "Confirmation wait cancelled");
                Err(DeployError::Cancelled {
                    stage: stage.to_string(),
                })
            }
        }
    }
}

async fn wait_for_policy<F, Fut>(stage: &str, policy: &WaitPolicy, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    match *policy {
        WaitPolicy::Skip => {}
        WaitPolicy::Fixed { seconds } => {
            tracing::info!(stage, seconds, "Waiting for confirmation...");
            tokio::time::sleep(Duration::from_secs(seconds)).await;
        }
        WaitPolicy::Poll {
            min_delay_ms,
            max_delay_secs,
            max_attempts,
        } => {
            tracing::info!(stage, max_attempts, "Waiting until the deployment is indexed...");

            let result = (|| {
                let check = condition();
                async move {
                    if check.await? {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("not visible yet"))
                    }
                }
            })
            .retry(WaitPolicy::backoff(min_delay_ms, max_delay_secs, max_attempts))
            .notify(|err: &anyhow::Error, after: Duration| {
                tracing::debug!(stage, error = %err, retry_in = ?after, "Confirmation check failed, retrying...");
            })
            .await;

            match result {
                Ok(()) => tracing::info!(stage, "Deployment indexed"),
                Err(err) => tracing::warn!(
                    stage,
                    error = %err,
                    "Deployment still not indexed, continuing anyway"
                ),
            }
        }
    }
}

/// Resolves once the flag is `true`; never resolves if the sender is gone.
async fn cancelled(mut cancel: watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
