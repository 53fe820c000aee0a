//! Repository port for agent registrations held in the shared store.

use crate::registry::domain::{AgentId, AgentRegistration};
use crate::store::StoreFault;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for agent registry repository operations.
pub type AgentRegistryResult<T> = Result<T, AgentRegistryError>;

/// Keyset pagination request for registration listings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistrationPageQuery {
    /// Restricts the listing to one agent type.
    pub agent_type: Option<String>,
    /// Returns only registrations ordered strictly after this identifier.
    pub after: Option<AgentId>,
    /// Maximum number of registrations in the page.
    pub limit: usize,
}

/// Persistence contract for agent registrations.
///
/// Every method is a single atomic operation against the shared store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentRegistryRepository: Send + Sync {
    /// Creates the registration or overwrites an existing one for the same
    /// agent.
    async fn upsert(&self, registration: &AgentRegistration) -> AgentRegistryResult<()>;

    /// Renews the liveness marker of an existing registration and marks it
    /// active.
    ///
    /// Returns `None` when the agent has no registration or was
    /// deregistered; such agents must be registered afresh.
    async fn record_heartbeat(
        &self,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> AgentRegistryResult<Option<AgentRegistration>>;

    /// Marks a registration deregistered and drops its marker.
    ///
    /// Returns `None` when the agent has no registration.
    async fn deregister(
        &self,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> AgentRegistryResult<Option<AgentRegistration>>;

    /// Finds the registration for an agent.
    async fn find(&self, agent_id: &AgentId) -> AgentRegistryResult<Option<AgentRegistration>>;

    /// Returns one page of registrations ordered by `(type, instance)`.
    async fn list_page(
        &self,
        query: &RegistrationPageQuery,
    ) -> AgentRegistryResult<Vec<AgentRegistration>>;

    /// Persists `Expired` for active registrations whose marker lapsed
    /// before `now`, returning the affected agents.
    async fn expire_lapsed(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AgentRegistryResult<Vec<AgentId>>;
}

/// Errors returned by agent registry repository implementations.
#[derive(Debug, Clone, Error)]
pub enum AgentRegistryError {
    /// Persisted data could not be reconstructed into domain types.
    #[error("invalid persisted registration data: {0}")]
    InvalidPersistedData(Arc<dyn std::error::Error + Send + Sync>),

    /// The store could not be reached.
    #[error("registry store unavailable: {0}")]
    Unavailable(Arc<dyn std::error::Error + Send + Sync>),

    /// A single store call exceeded its timeout.
    #[error("registry store call timed out after {0:?}")]
    TimedOut(Duration),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl AgentRegistryError {
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

impl StoreFault for AgentRegistryError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::TimedOut(_))
    }

    fn timed_out(after: Duration) -> Self {
        Self::TimedOut(after)
    }
}
