//! Generic retry wrapper for venue calls.
//!
//! Bounded exponential backoff with jitter. Each failure is classified into an
//! `ErrorAction`; only `Retry` is retried, anything else is returned
//! immediately. Backoff sleeps never happen while a caller holds a lock:
//! callers wrap only the venue call itself.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ErrorAction, VenueError, VenueResult};

/// Retry policy for venue calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound on cumulative backoff sleep per call.
    #[serde(default = "default_max_total_wait_ms")]
    pub max_total_wait_ms: u64,
    /// Random jitter added to each delay (0 disables).
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_max_total_wait_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    250
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_total_wait_ms: default_max_total_wait_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay_ms`. A table-provided delay acts as a floor.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        let delay = Duration::from_millis(delay);
        let delay = hint.map_or(delay, |h| h.max(delay));
        delay + Duration::from_millis(rand_jitter(self.jitter_ms))
    }
}

/// Run `call` under `policy`, classifying failures with the static code table.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, call: F) -> VenueResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = VenueResult<T>>,
{
    retry_with(policy, operation, VenueError::action, call).await
}

/// Run `call` under `policy` with a caller-supplied classifier.
pub async fn retry_with<T, F, Fut, C>(
    policy: &RetryPolicy,
    operation: &str,
    classify: C,
    mut call: F,
) -> VenueResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = VenueResult<T>>,
    C: Fn(&VenueError) -> ErrorAction,
{
    let max_attempts = policy.max_attempts.max(1);
    let max_total_wait = Duration::from_millis(policy.max_total_wait_ms);
    let mut waited = Duration::ZERO;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match call().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Venue call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        let delay = match classify(&err) {
            ErrorAction::Retry { delay } => delay,
            _ => return Err(err),
        };

        if attempt >= max_attempts {
            warn!(operation, attempt, error = %err, "Venue call retries exhausted");
            return Err(VenueError::RetriesExhausted {
                operation: operation.to_string(),
                attempts: attempt,
                last: Box::new(err),
            });
        }

        let sleep = policy.backoff_delay(attempt, delay);
        if waited + sleep > max_total_wait {
            warn!(
                operation,
                attempt,
                waited_ms = waited.as_millis() as u64,
                error = %err,
                "Venue call exceeded cumulative retry budget"
            );
            return Err(VenueError::RetriesExhausted {
                operation: operation.to_string(),
                attempts: attempt,
                last: Box::new(err),
            });
        }

        warn!(
            operation,
            attempt,
            delay_ms = sleep.as_millis() as u64,
            error = %err,
            "Transient venue error, retrying"
        );
        tokio::time::sleep(sleep).await;
        waited += sleep;
    }
}

/// Generate jitter in `0..max_ms` from the clock's sub-second nanos.
fn rand_jitter(max_ms: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    if max_ms == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos) % max_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 4,
            max_total_wait_ms: 1_000,
            jitter_ms: 0,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            jitter_ms: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_delay(1, None), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(2, None), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_delay(3, None), Duration::from_millis(2_000));
        assert_eq!(policy.backoff_delay(10, None), Duration::from_millis(8_000));
    }

    #[test]
    fn test_table_delay_is_a_floor() {
        let policy = RetryPolicy {
            jitter_ms: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(
            policy.backoff_delay(1, Some(Duration::from_millis(2_000))),
            Duration::from_millis(2_000)
        );
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry(&fast_policy(3), "place_order", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(VenueError::Transport("reset".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_precision_error_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: VenueResult<()> = retry(&fast_policy(5), "place_order", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(VenueError::api(-1111, "precision"))
        })
        .await;
        assert!(matches!(result, Err(VenueError::Api { code: -1111, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: VenueResult<()> = retry(&fast_policy(3), "get_mark_price", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(VenueError::Timeout(Duration::from_millis(1)))
        })
        .await;
        match result {
            Err(VenueError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cumulative_wait_budget() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 5,
            max_delay_ms: 5,
            max_total_wait_ms: 12,
            jitter_ms: 0,
        };
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: VenueResult<()> = retry(&policy, "get_klines", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(VenueError::Transport("down".into()))
        })
        .await;
        assert!(matches!(result, Err(VenueError::RetriesExhausted { .. })));
        // Two sleeps of 5ms fit in 12ms, the third does not.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
