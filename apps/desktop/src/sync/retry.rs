//! Bounded retries with exponential backoff for remote calls.

use super::remote::RemoteError;
use super::SyncError;
use std::future::Future;
use std::time::Duration;

/// Attempts made before a sync is given up and backed up locally.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Delay after the first failed attempt.
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
/// Upper bound on any single delay.
const MAX_BACKOFF: Duration = Duration::from_secs(8);
/// Deadline for one attempt, including the response body.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
            attempt_timeout: ATTEMPT_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): `initial * 2^(attempt-1)`, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// Returns the value with the number of attempts it took. Every attempt
    /// is bounded by `attempt_timeout`; a timeout counts as transient.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<(T, u32), SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(RemoteError::Transient(format!(
                    "timed out after {}ms",
                    self.attempt_timeout.as_millis()
                ))),
            };

            match result {
                Ok(value) => return Ok((value, attempt)),
                Err(RemoteError::Permanent { message, .. }) => {
                    tracing::warn!(label, attempt, %message, "remote rejected request");
                    return Err(SyncError::PermanentRejection(message));
                }
                Err(RemoteError::Transient(message)) if attempt >= max_attempts => {
                    tracing::warn!(label, attempt, %message, "giving up after transient failures");
                    return Err(SyncError::TransientNetworkFailure {
                        attempts: attempt,
                        last_error: message,
                    });
                }
                Err(RemoteError::Transient(message)) => {
                    let delay = self.backoff_for(attempt);
                    tracing::info!(
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %message,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
