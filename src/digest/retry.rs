use std::future::Future;
use std::time::Duration;

/// Bounded retry with linear backoff: the n-th retry waits `n * backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn delay_before(&self, retry: u32) -> Duration {
        self.backoff * retry
    }

    /// Run `operation` until it succeeds, fails with an error `is_retryable` refuses, or
    /// the retry bound is exhausted. The last error is returned as is.
    pub async fn run<T, E, F, Fut, R>(&self, mut operation: F, is_retryable: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Debug,
    {
        let mut retry = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if retry < self.max_retries && is_retryable(&err) => {
                    retry += 1;
                    let delay = self.delay_before(retry);

                    tracing::warn!(
                        error.cause_chain = ?err,
                        retry,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, retrying."
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
