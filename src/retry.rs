//! Shared retry-with-backoff policy, applied uniformly by the API client,
//! the PDF extractor's download step, and the geocoder.
//!
//! Grounded on this codebase's adaptive rate limiter (`scrapers/rate_limiter`):
//! same exponential-backoff arithmetic, reshaped into a standalone policy
//! object instead of a per-domain state machine, since here the retry
//! budget is per-call rather than per-domain.

use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_sec: f64, max_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs_f64(base_delay_sec),
            max_delay,
        }
    }

    /// Delay before the given zero-indexed attempt: `base * 2^attempt`,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        Duration::from_secs_f64(scaled).min(self.max_delay)
    }

    /// Run `op` up to `max_attempts` times, retrying only while both
    /// `retryable` accepts the error and attempts remain. Sleeps between
    /// attempts using [`delay_for_attempt`].
    pub async fn run<T, E, F, Fut, R>(&self, mut op: F, retryable: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt + 1 < self.max_attempts && retryable(&e) => {
                    let delay = self.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, "retrying after transient error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::new(5, 1.0, Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn run_retries_until_success() {
        let policy = RetryPolicy::new(3, 0.001, Duration::from_millis(5));
        let mut calls = 0;
        let result: Result<i32, &str> = policy
            .run(
                || {
                    calls += 1;
                    async move {
                        if calls < 3 {
                            Err("transient")
                        } else {
                            Ok(42)
                        }
                    }
                },
                |_| true,
            )
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn run_stops_on_non_retryable() {
        let policy = RetryPolicy::new(5, 0.001, Duration::from_millis(5));
        let mut calls = 0;
        let result: Result<i32, &str> = policy
            .run(
                || {
                    calls += 1;
                    async move { Err("terminal") }
                },
                |e| *e != "terminal",
            )
            .await;
        assert_eq!(result, Err("terminal"));
        assert_eq!(calls, 1);
    }
}
