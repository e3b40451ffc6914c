//! Retry policy for store operations.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{RetryConfig, StoreConfig};
use crate::error::StoreError;

/// Kind of store operation, selecting its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// An ordinary command.
    Command,
    /// Enqueueing background work.
    Enqueue,
    /// Dequeueing background work.
    Dequeue,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Command => write!(f, "command"),
            OperationKind::Enqueue => write!(f, "enqueue"),
            OperationKind::Dequeue => write!(f, "dequeue"),
        }
    }
}

/// Retries retriable store errors with exponential backoff.
///
/// Each attempt runs under the timeout for its [`OperationKind`]. The
/// cancellation token is checked before every attempt and interrupts both
/// attempts and backoff. Errors that are not retriable are returned
/// immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retry: RetryConfig,
    command_timeout: Duration,
    enqueue_timeout: Duration,
    dequeue_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&StoreConfig::default())
    }
}

impl RetryPolicy {
    /// Creates a policy from store settings.
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            command_timeout: config.command_timeout,
            enqueue_timeout: config.enqueue_timeout,
            dequeue_timeout: config.dequeue_timeout,
        }
    }

    /// Returns the timeout applied to one attempt of an operation kind.
    pub fn timeout_for(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Command => self.command_timeout,
            OperationKind::Enqueue => self.enqueue_timeout,
            OperationKind::Dequeue => self.dequeue_timeout,
        }
    }

    /// Grows a backoff delay, saturating at the configured maximum.
    fn next_delay(&self, delay: Duration) -> Duration {
        let next = delay.as_secs_f64() * self.retry.backoff_multiplier;
        Duration::try_from_secs_f64(next)
            .map_or(self.retry.max_delay, |d| d.min(self.retry.max_delay))
    }

    /// Runs `op` until it succeeds, fails with a non-retriable error, or
    /// runs out of attempts.
    pub async fn execute<T, F, Fut>(
        &self,
        kind: OperationKind,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let limit = self.timeout_for(kind);
        let mut delay = self.retry.initial_delay;
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            attempts += 1;

            let result = tokio::select! {
                _ = cancel.cancelled() => Err(StoreError::Cancelled),
                outcome = timeout(limit, op()) => outcome.unwrap_or(Err(
                    StoreError::OperationTimeout {
                        timeout_ms: limit.as_millis() as u64,
                    },
                )),
            };

            match result {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(
                            attempts = attempts,
                            kind = %kind,
                            "Store operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if !e.is_retriable() || attempts > self.retry.max_retries {
                        return Err(e);
                    }

                    warn!(
                        attempt = attempts,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis(),
                        kind = %kind,
                        error = %e,
                        "Store operation failed, retrying"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                        _ = sleep(delay) => {}
                    }
                    delay = self.next_delay(delay);
                }
            }
        }
    }
}
