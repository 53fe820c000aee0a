//! Node fixtures sharing in-memory stores.

use crate::test_helpers::ManualClock;
use rstest::fixture;
use std::sync::Arc;
use std::time::Duration;
use switchyard::breaker::{
    adapters::memory::InMemoryCircuitStore,
    domain::{BreakerPolicies, BreakerPolicy},
    services::CircuitBreakerService,
};
use switchyard::coordinator::{
    adapters::memory::InMemoryMailboxStore, domain::RetryBackoff,
    services::{CoordinatorSettings, MessageCoordinator},
};
use switchyard::registry::{
    adapters::memory::InMemoryAgentRegistry,
    services::{AgentRegistryService, RegistrySettings},
};
use switchyard::store::{KeyNamespace, StoreRetryPolicy};

pub type Registry = AgentRegistryService<InMemoryAgentRegistry, ManualClock>;
pub type Breaker = CircuitBreakerService<InMemoryCircuitStore, ManualClock>;
pub type Coordinator = MessageCoordinator<InMemoryMailboxStore, Registry, Breaker, ManualClock>;

/// One process's view of the shared stores.
pub struct Node {
    pub registry: Arc<Registry>,
    pub breaker: Arc<Breaker>,
    pub coordinator: Arc<Coordinator>,
}

/// Backing stores shared by every node built from it.
#[derive(Clone, Default)]
pub struct SharedStore {
    pub registrations: InMemoryAgentRegistry,
    pub circuits: InMemoryCircuitStore,
    pub mailboxes: InMemoryMailboxStore,
    pub clock: ManualClock,
}

impl SharedStore {
    /// Returns handles onto the same state scoped to `namespace`.
    pub fn namespaced(&self, namespace: &str) -> Self {
        let scope = KeyNamespace::new(namespace).expect("valid namespace");
        Self {
            registrations: self.registrations.for_namespace(scope.clone()),
            circuits: self.circuits.for_namespace(scope.clone()),
            mailboxes: self.mailboxes.for_namespace(scope),
            clock: self.clock.clone(),
        }
    }

    /// Builds a node with default registry settings.
    pub fn node(&self) -> Node {
        self.node_with(RegistrySettings {
            retry: fast_retry(),
            ..RegistrySettings::default()
        })
    }

    /// Builds a node with explicit registry settings.
    pub fn node_with(&self, registry_settings: RegistrySettings) -> Node {
        let clock = Arc::new(self.clock.clone());
        let registry = Arc::new(AgentRegistryService::with_settings(
            Arc::new(self.registrations.clone()),
            Arc::clone(&clock),
            registry_settings,
        ));
        let breaker = Arc::new(CircuitBreakerService::with_policies(
            Arc::new(self.circuits.clone()),
            Arc::clone(&clock),
            BreakerPolicies::new(breaker_policy()).expect("valid policy"),
            fast_retry(),
        ));
        let coordinator = Arc::new(MessageCoordinator::with_settings(
            Arc::new(self.mailboxes.clone()),
            Arc::clone(&registry),
            Arc::clone(&breaker),
            clock,
            coordinator_settings(),
        ));
        Node {
            registry,
            breaker,
            coordinator,
        }
    }
}

pub fn fast_retry() -> StoreRetryPolicy {
    StoreRetryPolicy::new(
        3,
        Duration::from_millis(1),
        Duration::from_millis(1),
        Duration::from_secs(1),
    )
}

pub fn breaker_policy() -> BreakerPolicy {
    BreakerPolicy {
        failure_threshold: 3,
        success_threshold: 1,
        cooldown_seconds: 10,
        max_cooldown_seconds: 40,
        ..BreakerPolicy::default()
    }
}

pub fn coordinator_settings() -> CoordinatorSettings {
    CoordinatorSettings {
        backoff: RetryBackoff::new(Duration::from_secs(1), Duration::from_secs(60)),
        retry: fast_retry(),
        ..CoordinatorSettings::default()
    }
}

/// Provides a fresh set of shared stores for each test.
#[fixture]
pub fn store() -> SharedStore {
    SharedStore::default()
}
