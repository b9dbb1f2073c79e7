//! Fixed-delay retry for remote chunk operations

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use cvfs_core::config::TransferConfig;
use cvfs_core::{CvfsError, CvfsResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
    /// Per-attempt deadline. Expiry counts as a transient failure.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &TransferConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            delay: cfg.retry_delay(),
            timeout: Some(cfg.operation_timeout()),
        }
    }

    /// Same budget without pauses.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: Duration::ZERO,
            timeout: None,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget runs out.
///
/// Only [`CvfsError::Transient`] is retried. Exhaustion yields
/// [`CvfsError::TransferFailed`]; cancellation yields [`CvfsError::Cancelled`]
/// without waiting for the in-flight attempt.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> CvfsResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CvfsResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(CvfsError::Cancelled);
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CvfsError::Cancelled),
            r = attempt_once(policy.timeout, op()) => r,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                warn!(what, attempt, max_attempts = attempts, error = %e, "transient failure");
                last_error = e.to_string();
                if attempt < attempts && !policy.delay.is_zero() {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(CvfsError::Cancelled),
                        _ = tokio::time::sleep(policy.delay) => {}
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(CvfsError::TransferFailed {
        attempts,
        last_error,
    })
}

async fn attempt_once<T, Fut>(timeout: Option<Duration>, fut: Fut) -> CvfsResult<T>
where
    Fut: Future<Output = CvfsResult<T>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(r) => r,
            Err(_) => Err(CvfsError::Transient(format!(
                "operation timed out after {}ms",
                limit.as_millis()
            ))),
        },
        None => fut.await,
    }
}
