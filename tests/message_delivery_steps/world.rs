//! Shared world state for message delivery scenarios.

use crate::test_helpers::ManualClock;
use rstest::fixture;
use std::sync::Arc;
use std::time::Duration;
use switchyard::breaker::{adapters::memory::InMemoryCircuitStore, services::CircuitBreakerService};
use switchyard::coordinator::{
    adapters::memory::InMemoryMailboxStore,
    domain::{Message, RetryBackoff},
    services::{CoordinatorSettings, MessageCoordinator},
};
use switchyard::registry::{adapters::memory::InMemoryAgentRegistry, services::AgentRegistryService};

/// Registry type used by the world.
pub type TestRegistry = AgentRegistryService<InMemoryAgentRegistry, ManualClock>;

/// Coordinator type used by the world.
pub type TestCoordinator = MessageCoordinator<
    InMemoryMailboxStore,
    TestRegistry,
    CircuitBreakerService<InMemoryCircuitStore, ManualClock>,
    ManualClock,
>;

/// Lease taken by every receive in the scenarios.
pub const LEASE: Duration = Duration::from_secs(30);

/// Scenario world for delivery behaviour tests.
pub struct DeliveryWorld {
    /// Clock shared by every service.
    pub clock: ManualClock,
    /// Agent registry under test.
    pub registry: Arc<TestRegistry>,
    /// Coordinator under test.
    pub coordinator: TestCoordinator,
    /// Messages returned by the last receive.
    pub received: Vec<Message>,
}

impl Default for DeliveryWorld {
    fn default() -> Self {
        let clock = ManualClock::default();
        let shared_clock = Arc::new(clock.clone());
        let registry = Arc::new(AgentRegistryService::new(
            Arc::new(InMemoryAgentRegistry::new()),
            Arc::clone(&shared_clock),
        ));
        let breaker = Arc::new(CircuitBreakerService::new(
            Arc::new(InMemoryCircuitStore::new()),
            Arc::clone(&shared_clock),
        ));
        let coordinator = MessageCoordinator::with_settings(
            Arc::new(InMemoryMailboxStore::new()),
            Arc::clone(&registry),
            breaker,
            shared_clock,
            CoordinatorSettings {
                backoff: RetryBackoff::new(Duration::from_secs(1), Duration::from_secs(60)),
                ..CoordinatorSettings::default()
            },
        );
        Self {
            clock,
            registry,
            coordinator,
            received: Vec::new(),
        }
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> DeliveryWorld {
    DeliveryWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
