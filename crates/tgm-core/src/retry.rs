use std::{future::Future, time::Duration};

use tracing::warn;

/// Linear backoff: the wait before attempt `n + 1` is `base_delay * n`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation failed with a non-contention error; no retry was made.
    #[error("{0}")]
    Fatal(E),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

/// Run `op`, retrying only while `is_contention` says the failure is transient
/// resource contention.
pub async fn with_retry<T, E, F, Fut, P>(
    policy: RetryPolicy,
    is_contention: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if !is_contention(&e) => return Err(RetryError::Fatal(e)),
            Err(e) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: e,
                })
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(attempt, max_attempts, delay = ?delay, error = %e, "resource busy, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn busy() -> Error {
        Error::ResourceBusy {
            resource: "logs.jsonl.lock".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_linear_backoff() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();

        let out = with_retry(RetryPolicy::default(), Error::is_resource_busy, || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(busy())
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();

        assert_eq!(out, 3);
        // 2s after the first failure, 4s after the second.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(6) && waited < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn non_contention_error_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let err = with_retry(RetryPolicy::default(), Error::is_resource_busy, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::Unauthorized("token revoked".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, RetryError::Fatal(Error::Unauthorized(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempts_and_last_error() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        let err = with_retry(policy, Error::is_resource_busy, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(busy())
        })
        .await
        .unwrap_err();

        match err {
            RetryError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(last.is_resource_busy());
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
