//! Bounded retry with exponential backoff for agent invocations.

use crate::agent::InvokeError;
use std::future::Future;
use std::time::Duration;

/// Retry budget and backoff shape for one invocation sequence.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay after the n-th failed attempt (0-indexed): `base * 2^n + 2n`
    /// seconds. With the default base this yields 5s, 12s, 25s, 44s.
    pub fn backoff_delay(&self, failed_attempt: u32) -> Duration {
        self.base_delay * 2u32.pow(failed_attempt)
            + Duration::from_secs(u64::from(failed_attempt) * 2)
    }
}

/// How a retried invocation ultimately failed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// Every attempt in the budget failed with a transient error.
    #[error("retry budget exhausted: {0}")]
    Exhausted(InvokeError),

    /// A non-retryable failure cut the sequence short.
    #[error(transparent)]
    Fatal(InvokeError),
}

impl RetryError {
    pub fn inner(&self) -> &InvokeError {
        match self {
            RetryError::Exhausted(error) | RetryError::Fatal(error) => error,
        }
    }
}

/// Run `operation` until it succeeds, fails fatally, or the budget runs out.
///
/// Only [`InvokeError::Transient`] failures are retried. Each retry waits
/// the policy's backoff delay first, so a full default sequence spends
/// 5 + 12 + 25 + 44 = 86 seconds sleeping before the final attempt.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InvokeError>>,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            let delay = policy.backoff_delay(attempt - 1);
            tracing::debug!(
                attempt = attempt + 1,
                delay_secs = delay.as_secs(),
                "backing off before retry"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() => {
                tracing::warn!(attempt = attempt + 1, %error, "transient invocation failure");
                last_error = Some(error);
            }
            Err(error) => return Err(RetryError::Fatal(error)),
        }
    }

    Err(match last_error {
        Some(error) => RetryError::Exhausted(error),
        // A zero-attempt budget never ran the operation at all.
        None => RetryError::Exhausted(InvokeError::Transient(
            "retry budget allows no attempts".into(),
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_schedule_matches_the_documented_curve() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..5).map(|n| policy.backoff_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![5, 12, 25, 44, 77]);
        assert!(delays.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_consume_the_whole_budget() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let outcome: Result<(), _> = run_with_retry(&policy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(InvokeError::Transient("503 overloaded".into())) }
        })
        .await;

        assert!(matches!(outcome, Err(RetryError::Exhausted(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        // 5 + 12 + 25 + 44 seconds of backoff between the five attempts.
        assert_eq!(started.elapsed(), Duration::from_secs(86));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failure_short_circuits_on_the_first_attempt() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let outcome: Result<(), _> = run_with_retry(&policy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(InvokeError::Fatal("401 unauthorized".into())) }
        })
        .await;

        assert!(matches!(outcome, Err(RetryError::Fatal(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_mid_sequence_returns_the_value() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);

        let outcome = run_with_retry(&policy, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(InvokeError::Transient("429 rate limited".into()))
                } else {
                    Ok("recovered")
                }
            }
        })
        .await;

        assert_eq!(outcome.expect("should recover on the third attempt"), "recovered");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn immediate_success_skips_backoff() {
        let policy = RetryPolicy::default();
        let outcome = run_with_retry(&policy, || async { Ok::<_, InvokeError>(7) }).await;
        assert_eq!(outcome.expect("first attempt should succeed"), 7);
    }
}
