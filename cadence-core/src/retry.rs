//! Bounded retry for store writes
//!
//! A write is attempted up to `attempts` times. Between attempts the caller
//! sleeps for an exponentially growing backoff, capped at `max_backoff`;
//! the sleep ends early when the cancellation token fires.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Write retry policy (`[replay.retry]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per write, the first one included
    pub attempts: usize,
    /// Backoff after the first failure
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
    /// Upper bound for any single backoff
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Growth factor applied per failed attempt
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no backoff
    pub fn no_retry() -> Self {
        Self {
            attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Backoff after the `failures`-th consecutive failure (1-based)
    pub fn backoff_after(&self, failures: usize) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as usize) as i32;
        let scaled = self.backoff.as_secs_f64() * self.factor.max(1.0).powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(scaled)
    }
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error
    Exhausted { attempts: usize, last: E },
    /// Cancelled while backing off
    Cancelled,
}

/// Run `operation` until it succeeds, the attempts run out, or `cancel` fires
/// during a backoff
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = config.attempts.max(1);
    let mut failures = 0;

    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        failures += 1;
        if failures >= attempts {
            return Err(RetryError::Exhausted {
                attempts: failures,
                last: error,
            });
        }

        let backoff = config.backoff_after(failures);
        tracing::warn!(
            attempt = failures,
            attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "Write failed, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_backoff_grows_then_caps() {
        let config = RetryConfig::default()
            .with_backoff(Duration::from_millis(250))
            .with_max_backoff(Duration::from_secs(1));

        assert_eq!(config.backoff_after(1), Duration::from_millis(250));
        assert_eq!(config.backoff_after(2), Duration::from_millis(500));
        assert_eq!(config.backoff_after(3), Duration::from_secs(1));
        assert_eq!(config.backoff_after(40), Duration::from_secs(1));
    }

    #[test]
    fn test_reads_humantime_durations() {
        let config: RetryConfig = serde_json::from_value(serde_json::json!({
            "attempts": 5,
            "backoff": "50ms",
        }))
        .unwrap();

        assert_eq!(config.attempts, 5);
        assert_eq!(config.backoff, Duration::from_millis(50));
        assert_eq!(config.max_backoff, RetryConfig::default().max_backoff);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let calls = AtomicUsize::new(0);
        let config = RetryConfig::default().with_attempts(3);

        let result = with_retry(&config, &CancellationToken::new(), || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move { if call < 2 { Err("store busy") } else { Ok(call) } }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_with_last_error() {
        let calls = AtomicUsize::new(0);
        let config = RetryConfig::default().with_attempts(2);

        let result: Result<(), _> = with_retry(&config, &CancellationToken::new(), || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("refused #{}", call)) }
        })
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last, "refused #1");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_ends_backoff() {
        let config = RetryConfig::default().with_backoff(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = with_retry(&config, &cancel, || async { Err("down") }).await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
    }
}
