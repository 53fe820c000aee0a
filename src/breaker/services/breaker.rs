//! Circuit breaker orchestration over shared state.
//!
//! Every transition is load, apply, compare-and-swap. A lost swap reloads
//! and reapplies the transition to the fresher state, so the outcome is the
//! same as if the two writers had run one after the other.

use crate::breaker::{
    domain::{Admission, BreakerPolicies, BreakerPolicy, CircuitPhase, CircuitState, CircuitSubject, ProbePermit},
    ports::{CasOutcome, CircuitStateRepository, CircuitStoreError},
};
use crate::error::ErrorKind;
use crate::store::{StoreFault, StoreRetryPolicy, retry_transient};
use chrono::{DateTime, Utc};
use mockable::Clock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Compare-and-swap attempts before a transition gives up.
pub const MAX_CAS_ATTEMPTS: u32 = 16;

/// Service-level errors for breaker operations.
#[derive(Debug, Error)]
pub enum BreakerServiceError {
    /// The circuit rejected the call.
    #[error("circuit {subject} is open; retry after {retry_after:?}")]
    CircuitOpen {
        /// The rejecting subject.
        subject: CircuitSubject,
        /// Time until the circuit may admit a call again.
        retry_after: Duration,
    },

    /// Concurrent writers kept winning the compare-and-swap.
    #[error("circuit {subject} stayed contended after {attempts} attempts")]
    Contention {
        /// The contended subject.
        subject: CircuitSubject,
        /// Attempts made.
        attempts: u32,
    },

    /// The store stayed unreachable after the retry ceiling.
    #[error("coordination store unavailable: {0}")]
    CoordinationUnavailable(#[source] CircuitStoreError),

    /// Repository operation failed permanently.
    #[error(transparent)]
    Repository(CircuitStoreError),
}

impl From<CircuitStoreError> for BreakerServiceError {
    fn from(err: CircuitStoreError) -> Self {
        if err.is_transient() {
            Self::CoordinationUnavailable(err)
        } else {
            Self::Repository(err)
        }
    }
}

impl BreakerServiceError {
    /// Returns the stable classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Contention { .. } | Self::CoordinationUnavailable(_) => {
                ErrorKind::CoordinationUnavailable
            }
            Self::Repository(err) => ErrorKind::of_store_fault(err),
        }
    }
}

/// Result type for breaker service operations.
pub type BreakerServiceResult<T> = Result<T, BreakerServiceError>;

/// Outcome of [`CircuitBreakerService::wrap`].
#[derive(Debug, Error)]
pub enum WrapError<E> {
    /// The circuit rejected the call; the operation was not invoked.
    #[error("circuit {subject} is open; retry after {retry_after:?}")]
    CircuitOpen {
        /// The rejecting subject.
        subject: CircuitSubject,
        /// Time until the circuit may admit a call again.
        retry_after: Duration,
    },

    /// The operation ran and failed.
    #[error("wrapped operation failed: {0}")]
    Operation(#[source] E),

    /// The breaker could not decide whether to admit the call.
    #[error(transparent)]
    Breaker(BreakerServiceError),
}

impl<E> WrapError<E> {
    /// Returns the stable classification, or `None` for operation failures.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::CircuitOpen { .. } => Some(ErrorKind::CircuitOpen),
            Self::Operation(_) => None,
            Self::Breaker(err) => Some(err.kind()),
        }
    }
}

/// Shared circuit breaker.
#[derive(Clone)]
pub struct CircuitBreakerService<R, C>
where
    R: CircuitStateRepository,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    clock: Arc<C>,
    policies: BreakerPolicies,
    retry: StoreRetryPolicy,
}

impl<R, C> CircuitBreakerService<R, C>
where
    R: CircuitStateRepository,
    C: Clock + Send + Sync,
{
    /// Creates a breaker with the default policy and no overrides.
    #[must_use]
    pub fn new(repository: Arc<R>, clock: Arc<C>) -> Self {
        Self::with_policies(
            repository,
            clock,
            BreakerPolicies::default(),
            StoreRetryPolicy::default(),
        )
    }

    /// Creates a breaker with explicit policies.
    #[must_use]
    pub const fn with_policies(
        repository: Arc<R>,
        clock: Arc<C>,
        policies: BreakerPolicies,
        retry: StoreRetryPolicy,
    ) -> Self {
        Self {
            repository,
            clock,
            policies,
            retry,
        }
    }

    /// Returns the policy in force for `subject`.
    #[must_use]
    pub fn policy(&self, subject: &CircuitSubject) -> &BreakerPolicy {
        self.policies.for_subject(subject)
    }

    /// Returns the current state of `subject`, applying any lazy
    /// Open-to-HalfOpen transition that is due.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerServiceError`] when the store is unreachable or the
    /// subject stays contended.
    pub async fn state(&self, subject: &CircuitSubject) -> BreakerServiceResult<CircuitState> {
        let (state, ()) = self
            .transition(subject, |circuit, now, _| {
                circuit.resolve(now);
            })
            .await?;
        Ok(state)
    }

    /// Reports whether a call to `subject` would be admitted now, without
    /// consuming a probe slot.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerServiceError`] when the store is unreachable or the
    /// subject stays contended.
    pub async fn check(&self, subject: &CircuitSubject) -> BreakerServiceResult<Admission> {
        let state = self.state(subject).await?;
        Ok(state.admission(self.clock.utc(), self.policy(subject)))
    }

    /// Takes a call slot for `subject`, consuming a probe slot when
    /// half-open.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerServiceError::CircuitOpen`] when the circuit rejects
    /// the call, or another [`BreakerServiceError`] when the store is
    /// unreachable or the subject stays contended.
    pub async fn acquire(&self, subject: &CircuitSubject) -> BreakerServiceResult<ProbePermit> {
        let (_, decision) = self
            .transition(subject, |circuit, now, policy| circuit.acquire(now, policy))
            .await?;
        decision.map_err(|retry_after| BreakerServiceError::CircuitOpen {
            subject: subject.clone(),
            retry_after,
        })
    }

    /// Returns an unused half-open slot taken by [`Self::acquire`].
    ///
    /// # Errors
    ///
    /// Returns [`BreakerServiceError`] when the store is unreachable or the
    /// subject stays contended.
    pub async fn release_slot(
        &self,
        subject: &CircuitSubject,
    ) -> BreakerServiceResult<CircuitState> {
        let (state, ()) = self
            .transition(subject, |circuit, now, _| circuit.release_slot(now))
            .await?;
        Ok(state)
    }

    /// Records a successful call against `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerServiceError`] when the store is unreachable or the
    /// subject stays contended.
    pub async fn record_success(
        &self,
        subject: &CircuitSubject,
    ) -> BreakerServiceResult<CircuitState> {
        let (state, ()) = self
            .transition(subject, |circuit, now, policy| {
                circuit.record_success(now, policy);
            })
            .await?;
        Ok(state)
    }

    /// Records a failed call against `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerServiceError`] when the store is unreachable or the
    /// subject stays contended.
    pub async fn record_failure(
        &self,
        subject: &CircuitSubject,
    ) -> BreakerServiceResult<CircuitState> {
        let (state, ()) = self
            .transition(subject, |circuit, now, policy| {
                circuit.record_failure(now, policy);
            })
            .await?;
        Ok(state)
    }

    /// Runs `operation` if the circuit admits it, then records the outcome.
    ///
    /// A rejected call returns immediately without invoking `operation` and
    /// without touching the circuit. Failing to record the outcome is logged
    /// and does not mask the operation's result.
    ///
    /// # Errors
    ///
    /// Returns [`WrapError::CircuitOpen`] when rejected,
    /// [`WrapError::Operation`] when the operation fails, or
    /// [`WrapError::Breaker`] when admission could not be decided.
    pub async fn wrap<T, E, F, Fut>(
        &self,
        subject: &CircuitSubject,
        operation: F,
    ) -> Result<T, WrapError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.acquire(subject).await {
            Ok(_) => {}
            Err(BreakerServiceError::CircuitOpen {
                subject: rejected,
                retry_after,
            }) => {
                return Err(WrapError::CircuitOpen {
                    subject: rejected,
                    retry_after,
                });
            }
            Err(err) => return Err(WrapError::Breaker(err)),
        }

        let outcome = operation().await;
        let recorded = if outcome.is_ok() {
            self.record_success(subject).await
        } else {
            self.record_failure(subject).await
        };
        if let Err(err) = recorded {
            tracing::warn!(subject = %subject, error = %err, "failed to record call outcome");
        }
        outcome.map_err(WrapError::Operation)
    }

    async fn transition<T, F>(
        &self,
        subject: &CircuitSubject,
        mut apply: F,
    ) -> BreakerServiceResult<(CircuitState, T)>
    where
        F: FnMut(&mut CircuitState, DateTime<Utc>, &BreakerPolicy) -> T,
    {
        let policy = self.policies.for_subject(subject);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let stored = retry_transient(&self.retry, "breaker.load", || {
                self.repository.load(subject)
            })
            .await?;
            let expected_version = stored.as_ref().map(CircuitState::version);
            let current =
                stored.unwrap_or_else(|| CircuitState::closed(subject.clone(), policy));

            let now = self.clock.utc();
            let mut next = current.clone();
            let outcome = apply(&mut next, now, policy);
            if next == current {
                return Ok((next, outcome));
            }

            let candidate = next.next_version();
            let swapped = retry_transient(&self.retry, "breaker.compare_and_swap", || {
                self.repository
                    .compare_and_swap(expected_version, &candidate, now)
            })
            .await?;
            match swapped {
                CasOutcome::Applied => {
                    log_phase_change(&current, &candidate);
                    return Ok((candidate, outcome));
                }
                CasOutcome::Conflict => {
                    tracing::debug!(subject = %subject, "circuit write lost race, reloading");
                }
            }
        }
        Err(BreakerServiceError::Contention {
            subject: subject.clone(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }
}

fn log_phase_change(before: &CircuitState, after: &CircuitState) {
    if before.phase() == after.phase() {
        return;
    }
    let subject = after.subject();
    match after.phase() {
        CircuitPhase::Open => tracing::warn!(
            subject = %subject,
            from = %before.phase(),
            failures = after.consecutive_failures(),
            cooldown_seconds = after.cooldown_seconds(),
            trip_count = after.trip_count(),
            "circuit tripped"
        ),
        CircuitPhase::HalfOpen => tracing::info!(
            subject = %subject,
            "circuit cooldown elapsed, admitting probes"
        ),
        CircuitPhase::Closed => tracing::info!(subject = %subject, "circuit recovered"),
    }
}
