//! Shared pool and node fixtures for `PostgreSQL` integration tests.

use crate::test_helpers::ManualClock;
use eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use switchyard::breaker::{
    adapters::postgres::PostgresCircuitStore,
    domain::{BreakerPolicies, BreakerPolicy},
    services::CircuitBreakerService,
};
use switchyard::coordinator::{
    adapters::postgres::PostgresMailboxStore,
    domain::RetryBackoff,
    services::{CoordinatorSettings, MessageCoordinator},
};
use switchyard::registry::{
    adapters::postgres::PostgresAgentRegistry,
    services::{AgentRegistryService, RegistrySettings},
};
use switchyard::store::postgres::{CoordinationPgPool, apply_schema, build_pool};
use switchyard::store::{KeyNamespace, StoreRetryPolicy};
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Environment variable naming the test database.
pub const DATABASE_URL_ENV: &str = "SWITCHYARD_TEST_DATABASE_URL";

static POOL: OnceCell<CoordinationPgPool> = OnceCell::const_new();

pub type Registry = AgentRegistryService<PostgresAgentRegistry, ManualClock>;
pub type Breaker = CircuitBreakerService<PostgresCircuitStore, ManualClock>;
pub type Coordinator = MessageCoordinator<PostgresMailboxStore, Registry, Breaker, ManualClock>;

/// One process's view of the database.
pub struct PgNode {
    pub registry: Arc<Registry>,
    pub breaker: Arc<Breaker>,
    pub coordinator: Arc<Coordinator>,
}

/// Returns the shared pool with the schema applied, or `None` when no test
/// database is configured.
///
/// # Errors
///
/// Returns an error when the database is configured but unreachable.
pub async fn shared_pool() -> Result<Option<CoordinationPgPool>> {
    let Ok(url) = std::env::var(DATABASE_URL_ENV) else {
        return Ok(None);
    };
    let pool = POOL
        .get_or_try_init(|| async move {
            let pool = tokio::task::spawn_blocking(move || build_pool(&url, 8)).await??;
            apply_schema(&pool).await?;
            Ok::<_, eyre::Report>(pool)
        })
        .await?;
    Ok(Some(pool.clone()))
}

/// Returns a namespace no other test uses.
pub fn unique_namespace() -> KeyNamespace {
    KeyNamespace::new(format!("test-{}", Uuid::new_v4().simple())).expect("valid namespace")
}

pub fn fast_retry() -> StoreRetryPolicy {
    StoreRetryPolicy::new(
        3,
        Duration::from_millis(5),
        Duration::from_millis(20),
        Duration::from_secs(10),
    )
}

pub fn breaker_policy() -> BreakerPolicy {
    BreakerPolicy {
        failure_threshold: 3,
        success_threshold: 1,
        cooldown_seconds: 10,
        ..BreakerPolicy::default()
    }
}

/// Builds services over `pool` scoped to `namespace`.
pub fn node(pool: &CoordinationPgPool, namespace: &KeyNamespace, clock: &ManualClock) -> PgNode {
    let shared_clock = Arc::new(clock.clone());
    let registry = Arc::new(AgentRegistryService::with_settings(
        Arc::new(PostgresAgentRegistry::new(pool.clone(), namespace.clone())),
        Arc::clone(&shared_clock),
        RegistrySettings {
            page_size: 2,
            retry: fast_retry(),
            ..RegistrySettings::default()
        },
    ));
    let breaker = Arc::new(CircuitBreakerService::with_policies(
        Arc::new(PostgresCircuitStore::new(pool.clone(), namespace.clone())),
        Arc::clone(&shared_clock),
        BreakerPolicies::new(breaker_policy()).expect("valid policy"),
        fast_retry(),
    ));
    let coordinator = Arc::new(MessageCoordinator::with_settings(
        Arc::new(PostgresMailboxStore::new(pool.clone(), namespace.clone())),
        Arc::clone(&registry),
        Arc::clone(&breaker),
        shared_clock,
        CoordinatorSettings {
            backoff: RetryBackoff::new(Duration::from_secs(1), Duration::from_secs(60)),
            retry: fast_retry(),
            ..CoordinatorSettings::default()
        },
    ));
    PgNode {
        registry,
        breaker,
        coordinator,
    }
}
