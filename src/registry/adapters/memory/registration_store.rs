//! In-memory registration store.
//!
//! Each port call runs inside one write or read critical section, standing in
//! for a single store transaction. Clones share state, so several services in
//! one process observe the same registrations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use crate::registry::{
    domain::{AgentId, AgentRegistration, RegistrationStatus},
    ports::{
        AgentRegistryError, AgentRegistryRepository, AgentRegistryResult, RegistrationPageQuery,
    },
};
use crate::store::KeyNamespace;

type NamespaceRegistrations = BTreeMap<AgentId, AgentRegistration>;

/// Thread-safe in-memory agent registry repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAgentRegistry {
    namespace: KeyNamespace,
    state: Arc<RwLock<HashMap<KeyNamespace, NamespaceRegistrations>>>,
}

impl InMemoryAgentRegistry {
    /// Creates an empty registry in the default namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle onto the same backing state scoped to `namespace`.
    #[must_use]
    pub fn for_namespace(&self, namespace: KeyNamespace) -> Self {
        Self {
            namespace,
            state: Arc::clone(&self.state),
        }
    }

    fn read<T>(&self, f: impl FnOnce(Option<&NamespaceRegistrations>) -> T) -> AgentRegistryResult<T> {
        let state = self
            .state
            .read()
            .map_err(|err| AgentRegistryError::persistence(std::io::Error::other(err.to_string())))?;
        Ok(f(state.get(&self.namespace)))
    }

    fn write<T>(&self, f: impl FnOnce(&mut NamespaceRegistrations) -> T) -> AgentRegistryResult<T> {
        let mut state = self
            .state
            .write()
            .map_err(|err| AgentRegistryError::persistence(std::io::Error::other(err.to_string())))?;
        Ok(f(state.entry(self.namespace.clone()).or_default()))
    }
}

#[async_trait]
impl AgentRegistryRepository for InMemoryAgentRegistry {
    async fn upsert(&self, registration: &AgentRegistration) -> AgentRegistryResult<()> {
        self.write(|agents| {
            agents.insert(registration.agent_id().clone(), registration.clone());
        })
    }

    async fn record_heartbeat(
        &self,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> AgentRegistryResult<Option<AgentRegistration>> {
        self.write(|agents| {
            agents
                .get_mut(agent_id)
                .filter(|registration| registration.status() != RegistrationStatus::Deregistered)
                .map(|registration| {
                    registration.heartbeat_at(now);
                    registration.clone()
                })
        })
    }

    async fn deregister(
        &self,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> AgentRegistryResult<Option<AgentRegistration>> {
        self.write(|agents| {
            agents.get_mut(agent_id).map(|registration| {
                registration.deregister_at(now);
                registration.clone()
            })
        })
    }

    async fn find(&self, agent_id: &AgentId) -> AgentRegistryResult<Option<AgentRegistration>> {
        self.read(|agents| agents.and_then(|found| found.get(agent_id)).cloned())
    }

    async fn list_page(
        &self,
        query: &RegistrationPageQuery,
    ) -> AgentRegistryResult<Vec<AgentRegistration>> {
        self.read(|agents| {
            let Some(registrations) = agents else {
                return Vec::new();
            };
            let lower = query
                .after
                .as_ref()
                .map_or(Bound::Unbounded, Bound::Excluded);
            registrations
                .range((lower, Bound::Unbounded))
                .map(|(_, registration)| registration)
                .filter(|registration| {
                    query
                        .agent_type
                        .as_deref()
                        .is_none_or(|wanted| registration.agent_id().agent_type() == wanted)
                })
                .take(query.limit)
                .cloned()
                .collect()
        })
    }

    async fn expire_lapsed(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AgentRegistryResult<Vec<AgentId>> {
        self.write(|agents| {
            agents
                .values_mut()
                .filter(|registration| {
                    registration.status() == RegistrationStatus::Active
                        && registration.expires_at() <= now
                })
                .take(limit)
                .map(|registration| {
                    registration.mark_expired();
                    registration.agent_id().clone()
                })
                .collect()
        })
    }
}
