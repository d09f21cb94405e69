//! Exponential backoff for transient export failures.

use super::ExportError;
use shared::config::RetrySettings;
use std::future::Future;
use std::time::Duration;

/// Backoff schedule derived from an exporter's `retry_on_failure` settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_interval: Duration,
    max_interval: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    /// Builds a policy from configuration. Disabled retries mean a single attempt.
    #[must_use]
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: if settings.enabled {
                settings.max_attempts.max(1)
            } else {
                1
            },
            initial_interval: Duration::from_millis(settings.initial_interval_ms),
            max_interval: Duration::from_millis(settings.max_interval_ms),
            multiplier: settings.multiplier,
        }
    }

    /// Total attempts, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based): `initial * multiplier^(retry-1)`,
    /// capped at the maximum interval.
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        let max = self.max_interval.as_secs_f64();
        let secs = (self.initial_interval.as_secs_f64() * factor).min(max);
        if secs.is_finite() {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            self.max_interval
        }
    }

    /// Runs `operation` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// `on_retry` is called before each retry with the retry number and the error
    /// that caused it.
    ///
    /// # Errors
    ///
    /// Returns the last error if no attempt succeeded.
    pub async fn run<F, Fut, R>(&self, mut operation: F, mut on_retry: R) -> Result<(), ExportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), ExportError>>,
        R: FnMut(u32, &ExportError),
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() || attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    on_retry(attempt, &e);
                    tokio::time::sleep(self.delay(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::from_settings(&RetrySettings {
            enabled: true,
            max_attempts,
            initial_interval_ms: 1,
            max_interval_ms: 4,
            multiplier: 2.0,
        })
    }

    fn transient() -> ExportError {
        ExportError::Status {
            endpoint: "http://sink".to_string(),
            status: 503,
            body: String::new(),
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::from_settings(&RetrySettings::default());
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
        assert_eq!(policy.delay(3), Duration::from_millis(2000));
        assert_eq!(policy.delay(10), Duration::from_secs(30));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_disabled_retry_is_single_attempt() {
        let settings = RetrySettings {
            enabled: false,
            ..RetrySettings::default()
        };
        assert_eq!(RetryPolicy::from_settings(&settings).max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let mut retries = Vec::new();

        let result = policy(5)
            .run(
                || async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient())
                    } else {
                        Ok(())
                    }
                },
                |retry, _| retries.push(retry),
            )
            .await;

        tokio_test::assert_ok!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = policy(3)
            .run(
                || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                },
                |_, _| {},
            )
            .await;

        assert!(matches!(result, Err(ExportError::Status { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = policy(5)
            .run(
                || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ExportError::Encode("bad".to_string()))
                },
                |_, _| {},
            )
            .await;

        assert!(matches!(result, Err(ExportError::Encode(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
