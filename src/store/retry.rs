//! Bounded exponential retry of transient store faults.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Classifies port errors so that callers can tell connectivity faults from
/// business failures.
pub trait StoreFault: Sized {
    /// Returns `true` when the failure may succeed on a later attempt.
    fn is_transient(&self) -> bool;

    /// Builds the error reported when a single attempt exceeds its timeout.
    fn timed_out(after: Duration) -> Self;
}

/// Retry ceiling and pacing for store calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreRetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    attempt_timeout: Duration,
}

impl StoreRetryPolicy {
    /// Creates a policy. A `max_attempts` of zero is treated as one.
    #[must_use]
    pub const fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            base_delay,
            max_delay,
            attempt_timeout,
        }
    }

    /// Creates a policy that makes exactly one attempt.
    #[must_use]
    pub const fn no_retry(attempt_timeout: Duration) -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, attempt_timeout)
    }

    /// Returns the attempt ceiling.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the per-attempt timeout.
    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Returns the pause taken after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        exponential_delay(
            self.base_delay,
            attempt.saturating_sub(1),
            self.max_delay,
        )
    }
}

impl Default for StoreRetryPolicy {
    fn default() -> Self {
        Self::new(
            4,
            Duration::from_millis(50),
            Duration::from_secs(1),
            Duration::from_secs(5),
        )
    }
}

/// Computes `min(base * 2^exponent, cap)` without overflow.
#[must_use]
pub(crate) fn exponential_delay(base: Duration, exponent: u32, cap: Duration) -> Duration {
    2_u32
        .checked_pow(exponent)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(cap, |delay| delay.min(cap))
}

/// Runs `call` until it succeeds, fails permanently, or the policy's attempt
/// ceiling is reached.
///
/// Each attempt is bounded by the policy's attempt timeout; a timed-out
/// attempt counts as a transient fault. A timed-out attempt may still commit
/// in the store after it is abandoned, so mutations that cannot be replayed
/// blindly use [`retry_transient_or_resolve`].
///
/// # Errors
///
/// Returns the first non-transient error, or the last transient error once
/// the ceiling is reached.
pub async fn retry_transient<T, E, F, Fut>(
    policy: &StoreRetryPolicy,
    operation: &'static str,
    call: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: StoreFault + fmt::Display,
{
    run_attempts(policy, operation, call).await.outcome
}

/// Like [`retry_transient`], but hands a permanent error that follows a
/// transient fault to `resolve`.
///
/// The earlier attempt may have committed before its fault was observed, in
/// which case the replay is refused by the store. `resolve` looks at the
/// stored state and returns the committed outcome, or the error unchanged
/// when the earlier attempt did not commit.
///
/// # Errors
///
/// Same as [`retry_transient`], after `resolve` has had its say.
pub async fn retry_transient_or_resolve<T, E, F, Fut, R, RFut>(
    policy: &StoreRetryPolicy,
    operation: &'static str,
    call: F,
    resolve: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnOnce(E) -> RFut,
    RFut: Future<Output = Result<T, E>>,
    E: StoreFault + fmt::Display,
{
    let attempts = run_attempts(policy, operation, call).await;
    match attempts.outcome {
        Err(err) if attempts.after_fault && !err.is_transient() => {
            tracing::debug!(operation, error = %err, "replay refused, resolving earlier attempt");
            resolve(err).await
        }
        outcome => outcome,
    }
}

struct Attempts<T, E> {
    outcome: Result<T, E>,
    after_fault: bool,
}

async fn run_attempts<T, E, F, Fut>(
    policy: &StoreRetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Attempts<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: StoreFault + fmt::Display,
{
    let mut attempt: u32 = 1;
    loop {
        let outcome = tokio::time::timeout(policy.attempt_timeout, call())
            .await
            .unwrap_or_else(|_| Err(E::timed_out(policy.attempt_timeout)));
        let after_fault = attempt > 1;

        match outcome {
            Ok(value) => {
                return Attempts {
                    outcome: Ok(value),
                    after_fault,
                };
            }
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff_after(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "transient store fault, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
            Err(err) => {
                if err.is_transient() {
                    tracing::error!(
                        operation,
                        attempts = attempt,
                        error = %err,
                        "store unreachable after retry ceiling"
                    );
                }
                return Attempts {
                    outcome: Err(err),
                    after_fault,
                };
            }
        }
    }
}
