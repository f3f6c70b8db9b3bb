//! Bounded retry and create-or-recover helpers for registry calls.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::metrics;

/// Exponential backoff with a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .max(1.0)
            .powi(attempt.saturating_sub(1) as i32);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }
}

/// Runs `op` until it succeeds, fails with an error `is_retryable` rejects, or
/// the attempt budget is spent. The last error is returned on exhaustion.
pub async fn with_retry<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    operation: &str,
    is_retryable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying: {}",
                    e
                );
                metrics::RETRY_ATTEMPTS.with_label_values(&[operation]).inc();
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Runs `create`; if it fails with a conflict, runs `on_conflict` instead.
///
/// `on_conflict` decides what "recovering" means: reusing the existing
/// resource, or deleting and recreating it.
pub async fn ensure_idempotent<T, E, C, CFut, O, OFut>(
    create: C,
    is_conflict: impl Fn(&E) -> bool,
    on_conflict: O,
) -> Result<T, E>
where
    C: FnOnce() -> CFut,
    CFut: Future<Output = Result<T, E>>,
    O: FnOnce() -> OFut,
    OFut: Future<Output = Result<T, E>>,
{
    match create().await {
        Err(e) if is_conflict(&e) => on_conflict().await,
        other => other,
    }
}
