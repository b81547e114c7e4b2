//! Retry engine for transient provider failures.
//!
//! Every provider call runs inside a retry envelope: transient failures
//! (`Timeout`, `Overload`, `NotAvailable`, `Execution`) are retried with
//! exponential backoff; permanent failures short-circuit immediately.
//!
//! The engine charges each failed attempt its full per-attempt budget
//! against the overall budget, regardless of how quickly the attempt
//! actually failed. This makes the retry behavior deterministic: with a
//! per-attempt budget `b` and an overall budget `B`, an operation that
//! fails transiently `N` times then succeeds completes iff `B >= N*b`.
//! When the overall budget is exhausted the engine surfaces a `Timeout`
//! error whose cause is the last transient failure observed.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::debug;

use crate::error::{Error, Result};

/// Per-attempt and overall time budgets for a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    /// Maximum duration of a single attempt.
    pub attempt: Duration,
    /// Maximum total budget across all attempts.
    pub overall: Duration,
}

impl RetryBudget {
    /// Create a budget from a per-attempt and an overall duration.
    #[must_use]
    pub const fn new(attempt: Duration, overall: Duration) -> Self {
        Self { attempt, overall }
    }
}

/// Backoff policies for the delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Short initial delay, doubling, capped at one second. For calls local
    /// to the service (object storage on the same backbone, state polls).
    Local,
    /// Moderate initial delay, doubling, capped at one minute. For provider
    /// API calls that may be throttled.
    ProviderApi,
}

impl RetryPolicy {
    fn backoff(self) -> ExponentialBackoff {
        let (initial, max) = match self {
            Self::Local => (Duration::from_millis(50), Duration::from_secs(1)),
            Self::ProviderApi => (Duration::from_millis(250), Duration::from_secs(60)),
        };
        ExponentialBackoff {
            initial_interval: initial,
            max_interval: max,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or exhausts the
/// overall budget.
///
/// # Errors
///
/// Returns the operation's error unchanged on a permanent failure, and a
/// `Timeout` error wrapping the last transient failure when the overall
/// budget is exhausted.
pub async fn retry_with_budget<T, F, Fut>(
    budget: RetryBudget,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.backoff();
    let mut charged = Duration::ZERO;
    let mut attempts: u32 = 0;
    let mut last_transient: Option<Error>;

    loop {
        attempts += 1;
        let outcome = tokio::time::timeout(budget.attempt, operation()).await;
        match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) if err.is_transient() => {
                debug!(attempt = attempts, error = %err, "transient failure, will retry");
                last_transient = Some(err);
            }
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                debug!(attempt = attempts, "attempt exceeded its budget");
                last_transient = Some(Error::timeout(format!(
                    "attempt {attempts} exceeded its {:?} budget",
                    budget.attempt
                )));
            }
        }

        charged += budget.attempt;
        if charged > budget.overall {
            let err = Error::timeout(format!(
                "operation did not succeed within {:?} ({attempts} attempts)",
                budget.overall
            ));
            return Err(match last_transient {
                Some(cause) => err.with_cause(cause),
                None => err,
            });
        }

        if let Some(delay) = backoff.next_backoff() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use crate::error::ErrorKind;

    #[tokio::test(start_paused = true)]
    async fn succeeds_when_overall_budget_covers_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let budget = RetryBudget::new(Duration::from_secs(1), Duration::from_secs(3));
        let result = retry_with_budget(budget, RetryPolicy::Local, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(Error::overload("stub overloaded"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn surfaces_timeout_wrapping_last_transient() {
        let counter = Arc::new(AtomicU32::new(0));
        let budget = RetryBudget::new(Duration::from_secs(1), Duration::from_secs(2));
        let err = retry_with_budget(budget, RetryPolicy::Local, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(Error::overload("stub overloaded"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.cause().unwrap().kind(), ErrorKind::Overload);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_short_circuit() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let budget = RetryBudget::new(Duration::from_secs(1), Duration::from_secs(30));
        let err = retry_with_budget(budget, RetryPolicy::Local, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::duplicate("network already exists")) }
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_are_cut_at_the_attempt_budget() {
        let budget = RetryBudget::new(Duration::from_millis(100), Duration::from_millis(100));
        let err = retry_with_budget(budget, RetryPolicy::Local, || async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<(), Error>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
