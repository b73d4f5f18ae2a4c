//! Delayed, cancellable retry tasks.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Default number of retries before giving up
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// Exponential backoff for thumbnails that are not generated yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// Create a policy.
    pub const fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
        }
    }

    /// Delay before the first retry
    pub const fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Retries allowed per key
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// ceiling is reached.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor))
    }
}

/// A scheduled retry that has not fired yet
#[derive(Debug)]
pub(crate) struct PendingRetry {
    pub(crate) id: u64,
    token: CancellationToken,
    _task: JoinHandle<()>,
}

impl PendingRetry {
    /// Stop the retry from firing.
    pub(crate) fn cancel(self) {
        self.token.cancel();
    }
}

/// Per-key retry bookkeeping
#[derive(Debug, Default)]
pub(crate) struct RetryState {
    pub(crate) attempts: u32,
    pub(crate) pending: Option<PendingRetry>,
}

impl RetryState {
    pub(crate) fn cancel(self) {
        if let Some(pending) = self.pending {
            pending.cancel();
        }
    }
}

/// Run `task` after `delay` unless `token` is cancelled first.
pub(crate) fn schedule<F>(id: u64, delay: Duration, token: CancellationToken, task: F) -> PendingRetry
where
    F: Future<Output = ()> + Send + 'static,
{
    let wait = token.clone();
    let handle = tokio::spawn(async move {
        tokio::select! {
            () = wait.cancelled() => {
                tracing::trace!("Retry {id} cancelled");
            }
            () = tokio::time::sleep(delay) => task.await,
        }
    });

    PendingRetry {
        id,
        token,
        _task: handle,
    }
}
