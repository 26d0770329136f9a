//! Bounded exponential backoff for transient source failures.

use std::future::Future;

use meridian_common::RetryPolicy;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::SourceError;

/// Outcome of a retried operation.
#[derive(Debug)]
pub enum Retried<T> {
    Done(T),
    Cancelled,
}

/// Run `op` until it succeeds, fails permanently, or `policy.max_attempts`
/// transient failures have happened. Both the attempt in flight and the
/// backoff sleep are interrupted by `cancel`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<Retried<T>, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Ok(Retried::Cancelled);
        }

        let result = tokio::select! {
            r = op() => r,
            _ = cancel.cancelled() => return Ok(Retried::Cancelled),
        };

        match result {
            Ok(value) => return Ok(Retried::Done(value)),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    what,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient source failure, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Ok(Retried::Cancelled),
                }
            }
            Err(e) if e.is_transient() => {
                return Err(SourceError::Exhausted {
                    attempts: attempt,
                    last: e.to_string(),
                })
            }
            Err(e) => return Err(e),
        }
    }
}
