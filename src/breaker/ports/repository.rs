//! Repository port for circuit state held in the shared store.

use crate::breaker::domain::{CircuitState, CircuitSubject};
use crate::store::StoreFault;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for circuit state repository operations.
pub type CircuitStoreResult<T> = Result<T, CircuitStoreError>;

/// Outcome of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The expected version matched and the new state was written.
    Applied,
    /// Another writer got there first; reload and retry.
    Conflict,
}

/// Persistence contract for circuit state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CircuitStateRepository: Send + Sync {
    /// Loads the stored state for `subject`, or `None` if it was never
    /// written.
    async fn load(&self, subject: &CircuitSubject) -> CircuitStoreResult<Option<CircuitState>>;

    /// Writes `state` iff the stored version equals `expected_version`,
    /// stamping the write with `now`.
    ///
    /// `None` means the caller observed no stored state; the write then
    /// succeeds only if the state is still absent.
    async fn compare_and_swap(
        &self,
        expected_version: Option<u64>,
        state: &CircuitState,
        now: DateTime<Utc>,
    ) -> CircuitStoreResult<CasOutcome>;
}

/// Errors returned by circuit state repository implementations.
#[derive(Debug, Clone, Error)]
pub enum CircuitStoreError {
    /// Persisted data could not be reconstructed into domain types.
    #[error("invalid persisted circuit data: {0}")]
    InvalidPersistedData(Arc<dyn std::error::Error + Send + Sync>),

    /// The store could not be reached.
    #[error("circuit store unavailable: {0}")]
    Unavailable(Arc<dyn std::error::Error + Send + Sync>),

    /// A single store call exceeded its timeout.
    #[error("circuit store call timed out after {0:?}")]
    TimedOut(Duration),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl CircuitStoreError {
    /// Wraps a data-quality or deserialization error from persisted rows.
    pub fn invalid_persisted_data(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::InvalidPersistedData(Arc::new(err))
    }

    /// Wraps a connectivity failure.
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Unavailable(Arc::new(err))
    }

    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}

impl StoreFault for CircuitStoreError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::TimedOut(_))
    }

    fn timed_out(after: Duration) -> Self {
        Self::TimedOut(after)
    }
}
