//! Service layer for agent registration, heartbeats, and liveness queries.
//!
//! Provides [`AgentRegistryService`]. Every store call runs through
//! [`retry_transient`]; a transient fault that survives the retry ceiling
//! surfaces as [`AgentRegistryServiceError::CoordinationUnavailable`].

use crate::error::ErrorKind;
use crate::registry::{
    domain::{AgentId, AgentRegistration, LivenessTtl, RegistryDomainError, validate_type_filter},
    ports::{AgentRegistryError, AgentRegistryRepository, RegistrationPageQuery},
};
use crate::store::{StoreFault, StoreRetryPolicy, retry_transient};
use crate::sweeper::PeriodicSweep;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use mockable::Clock;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Default number of registrations fetched per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Tunables for [`AgentRegistryService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    /// TTL used when a heartbeat registers an unknown agent.
    pub default_ttl: LivenessTtl,
    /// Registrations fetched per page by [`AgentRegistryService::list_agents`].
    pub page_size: usize,
    /// Maximum registrations expired by one reaping pass.
    pub reap_batch_size: usize,
    /// Transient-fault retry policy for store calls.
    pub retry: StoreRetryPolicy,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            default_ttl: LivenessTtl::default(),
            page_size: DEFAULT_PAGE_SIZE,
            reap_batch_size: 500,
            retry: StoreRetryPolicy::default(),
        }
    }
}

/// Service-level errors for registry operations.
#[derive(Debug, Error)]
pub enum AgentRegistryServiceError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] RegistryDomainError),

    /// The agent has no registration.
    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),

    /// The store stayed unreachable after the retry ceiling.
    #[error("coordination store unavailable: {0}")]
    CoordinationUnavailable(#[source] AgentRegistryError),

    /// Repository operation failed permanently.
    #[error(transparent)]
    Repository(AgentRegistryError),
}

impl From<AgentRegistryError> for AgentRegistryServiceError {
    fn from(err: AgentRegistryError) -> Self {
        if err.is_transient() {
            Self::CoordinationUnavailable(err)
        } else {
            Self::Repository(err)
        }
    }
}

impl AgentRegistryServiceError {
    /// Returns the stable classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Domain(_) => ErrorKind::InvalidInput,
            Self::UnknownAgent(_) => ErrorKind::UnknownAgent,
            Self::CoordinationUnavailable(_) => ErrorKind::CoordinationUnavailable,
            Self::Repository(err) => ErrorKind::of_store_fault(err),
        }
    }
}

/// Result type for registry service operations.
pub type AgentRegistryServiceResult<T> = Result<T, AgentRegistryServiceError>;

/// Agent liveness registration service.
#[derive(Clone)]
pub struct AgentRegistryService<R, C>
where
    R: AgentRegistryRepository,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    clock: Arc<C>,
    settings: RegistrySettings,
}

impl<R, C> AgentRegistryService<R, C>
where
    R: AgentRegistryRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a registry service with default settings.
    #[must_use]
    pub fn new(repository: Arc<R>, clock: Arc<C>) -> Self {
        Self::with_settings(repository, clock, RegistrySettings::default())
    }

    /// Creates a registry service with explicit settings.
    #[must_use]
    pub const fn with_settings(
        repository: Arc<R>,
        clock: Arc<C>,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            repository,
            clock,
            settings,
        }
    }

    /// Returns the settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Creates or overwrites the registration for `agent_id` and starts a
    /// liveness marker of `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryServiceError::CoordinationUnavailable`] when the
    /// store cannot be reached.
    pub async fn register(
        &self,
        agent_id: AgentId,
        ttl: LivenessTtl,
        metadata: BTreeMap<String, String>,
    ) -> AgentRegistryServiceResult<AgentRegistration> {
        let registration = AgentRegistration::new(agent_id, ttl, metadata, &*self.clock);
        retry_transient(&self.settings.retry, "registry.register", || {
            self.repository.upsert(&registration)
        })
        .await?;
        tracing::info!(
            agent = %registration.agent_id(),
            ttl_seconds = ttl.seconds(),
            "agent registered"
        );
        Ok(registration)
    }

    /// Refreshes the heartbeat of `agent_id` and renews its liveness marker.
    ///
    /// An agent without a live registration (unknown or deregistered) is
    /// registered afresh with the default TTL and empty metadata.
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryServiceError::CoordinationUnavailable`] when the
    /// store cannot be reached.
    pub async fn heartbeat(&self, agent_id: &AgentId) -> AgentRegistryServiceResult<AgentRegistration> {
        let now = self.clock.utc();
        let renewed = retry_transient(&self.settings.retry, "registry.heartbeat", || {
            self.repository.record_heartbeat(agent_id, now)
        })
        .await?;

        if let Some(registration) = renewed {
            tracing::trace!(agent = %agent_id, expires_at = %registration.expires_at(), "heartbeat");
            return Ok(registration);
        }

        tracing::debug!(agent = %agent_id, "heartbeat from unregistered agent, registering");
        self.register(agent_id.clone(), self.settings.default_ttl, BTreeMap::new())
            .await
    }

    /// Marks `agent_id` deregistered; liveness checks report it dead
    /// immediately, independent of its TTL.
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryServiceError::UnknownAgent`] when the agent has
    /// no registration, or
    /// [`AgentRegistryServiceError::CoordinationUnavailable`] when the store
    /// cannot be reached.
    pub async fn deregister(&self, agent_id: &AgentId) -> AgentRegistryServiceResult<AgentRegistration> {
        let now = self.clock.utc();
        let registration = retry_transient(&self.settings.retry, "registry.deregister", || {
            self.repository.deregister(agent_id, now)
        })
        .await?
        .ok_or_else(|| AgentRegistryServiceError::UnknownAgent(agent_id.clone()))?;
        tracing::info!(agent = %agent_id, "agent deregistered");
        Ok(registration)
    }

    /// Returns `true` iff `agent_id` is active and its marker has not lapsed.
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryServiceError::CoordinationUnavailable`] when the
    /// store cannot be reached.
    pub async fn is_alive(&self, agent_id: &AgentId) -> AgentRegistryServiceResult<bool> {
        let now = self.clock.utc();
        Ok(self
            .lookup(agent_id)
            .await?
            .is_some_and(|registration| registration.is_alive(now)))
    }

    /// Finds the registration for `agent_id` with its effective status.
    ///
    /// Returns `Ok(None)` when the agent was never registered.
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryServiceError::CoordinationUnavailable`] when the
    /// store cannot be reached.
    pub async fn find(
        &self,
        agent_id: &AgentId,
    ) -> AgentRegistryServiceResult<Option<AgentRegistration>> {
        let now = self.clock.utc();
        Ok(self
            .lookup(agent_id)
            .await?
            .map(|registration| registration.observed_at(now)))
    }

    /// Lists registrations lazily, optionally restricted to one agent type.
    ///
    /// Pages are fetched on demand in `(type, instance)` order. The listing
    /// is a snapshot per page and is not consistent with registrations made
    /// while it is being consumed.
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryServiceError::Domain`] when the type filter is
    /// not a valid agent type. Store failures are yielded by the stream.
    pub fn list_agents(
        &self,
        filter_by_type: Option<&str>,
    ) -> AgentRegistryServiceResult<BoxStream<'static, AgentRegistryServiceResult<AgentRegistration>>>
    {
        let agent_type = filter_by_type.map(validate_type_filter).transpose()?;
        let repository = Arc::clone(&self.repository);
        let clock = Arc::clone(&self.clock);
        let retry = self.settings.retry;
        let page_size = self.settings.page_size.max(1);

        let pages = stream::try_unfold(Some(None), move |cursor: Option<Option<AgentId>>| {
            let repository = Arc::clone(&repository);
            let clock = Arc::clone(&clock);
            let query = cursor.map(|after| RegistrationPageQuery {
                agent_type: agent_type.clone(),
                after,
                limit: page_size,
            });
            async move {
                let Some(page_query) = query else {
                    return Ok(None);
                };
                let page = retry_transient(&retry, "registry.list_agents", || {
                    repository.list_page(&page_query)
                })
                .await?;
                let next_cursor = if page.len() < page_size {
                    None
                } else {
                    page.last()
                        .map(|registration| Some(registration.agent_id().clone()))
                };
                let now = clock.utc();
                let observed: Vec<AgentRegistration> = page
                    .into_iter()
                    .map(|registration| registration.observed_at(now))
                    .collect();
                Ok::<_, AgentRegistryServiceError>(Some((observed, next_cursor)))
            }
        });

        Ok(pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, AgentRegistryServiceError>)))
            .try_flatten()
            .boxed())
    }

    /// Persists `Expired` for registrations whose marker lapsed and returns
    /// the affected agents.
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryServiceError::CoordinationUnavailable`] when the
    /// store cannot be reached.
    pub async fn reap_expired(&self) -> AgentRegistryServiceResult<Vec<AgentId>> {
        let now = self.clock.utc();
        let expired = retry_transient(&self.settings.retry, "registry.reap_expired", || {
            self.repository
                .expire_lapsed(now, self.settings.reap_batch_size)
        })
        .await?;
        for agent_id in &expired {
            tracing::info!(agent = %agent_id, "registration expired");
        }
        Ok(expired)
    }

    async fn lookup(&self, agent_id: &AgentId) -> AgentRegistryServiceResult<Option<AgentRegistration>> {
        Ok(
            retry_transient(&self.settings.retry, "registry.find", || {
                self.repository.find(agent_id)
            })
            .await?,
        )
    }
}

#[async_trait]
impl<R, C> PeriodicSweep for AgentRegistryService<R, C>
where
    R: AgentRegistryRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    type Error = AgentRegistryServiceError;

    fn name(&self) -> &'static str {
        "registry.reap_expired"
    }

    async fn sweep(&self) -> Result<usize, Self::Error> {
        Ok(self.reap_expired().await?.len())
    }
}
