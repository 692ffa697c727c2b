//! Bounded retry with exponential backoff for adapter calls

use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::config::CoordinatorConfig;
use crate::error::AdapterError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Per-attempt deadline; a hung call counts as a network failure
    pub attempt_timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(30),
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            jitter_ms: 250,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            attempt_timeout: Duration::from_secs(30),
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
            jitter_ms: config.retry_base_delay().as_millis() as u64,
        }
    }

    /// Capped exponential delay for a zero-based attempt index, plus jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let capped = std::cmp::min(exp, self.max_delay);
        let jitter = if self.jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
        };
        capped + jitter
    }
}

/// Run an adapter call, retrying retryable errors up to the policy's budget.
/// Non-retryable errors propagate immediately.
pub async fn with_retries<T, F, Fut>(
    label: &'static str,
    chain_id: u64,
    policy: &RetryPolicy,
    mut action: F,
) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AdapterError>>,
{
    let attempts = policy.max_retries.saturating_add(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        let outcome = timeout(policy.attempt_timeout, action()).await;
        let err = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) if !err.is_retryable() => return Err(err),
            Ok(Err(err)) => err,
            Err(_) => AdapterError::NetworkUnavailable {
                chain_id,
                message: format!("{label} timed out"),
            },
        };

        warn!(chain_id, attempt = attempt + 1, error = %err, "retrying {label}");
        crate::metrics::record_adapter_retry(chain_id, label);
        last_error = Some(err);

        if attempt + 1 < attempts {
            sleep(policy.backoff(attempt)).await;
        }
    }

    Err(last_error.unwrap_or(AdapterError::NetworkUnavailable {
        chain_id,
        message: format!("{label} retries exhausted"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempt_timeout: Duration::from_millis(50),
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter_ms: 0,
        }
    }

    #[tokio::test]
    async fn retries_network_errors_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result = with_retries("test", 1, &fast_policy(), move || {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) + 1 < 3 {
                    Err(AdapterError::NetworkUnavailable {
                        chain_id: 1,
                        message: "flaky".into(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result: Result<(), _> = with_retries("test", 1, &fast_policy(), move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AdapterError::Rejected {
                    chain_id: 1,
                    reason: "invalid preimage".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(AdapterError::Rejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hung_attempts_count_as_network_failures() {
        let result: Result<(), _> = with_retries("test", 7, &fast_policy(), || async {
            sleep(Duration::from_millis(500)).await;
            Ok(())
        })
        .await;
        match result {
            Err(AdapterError::NetworkUnavailable { chain_id, .. }) => assert_eq!(chain_id, 7),
            other => panic!("expected network error, got {other:?}"),
        }
    }
}
