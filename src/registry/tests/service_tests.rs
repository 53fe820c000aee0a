//! Unit tests for registry service orchestration.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ErrorKind;
use crate::registry::{
    adapters::memory::InMemoryAgentRegistry,
    domain::{AgentId, AgentRegistration, LivenessTtl, RegistrationStatus},
    ports::{AgentRegistryError, MockAgentRegistryRepository},
    services::{AgentRegistryService, AgentRegistryServiceError, RegistrySettings},
};
use crate::store::{KeyNamespace, StoreRetryPolicy};
use crate::test_support::ManualClock;
use futures::TryStreamExt;
use rstest::{fixture, rstest};

type TestService = AgentRegistryService<InMemoryAgentRegistry, ManualClock>;

struct Harness {
    clock: ManualClock,
    repository: InMemoryAgentRegistry,
    service: TestService,
}

#[fixture]
fn harness() -> Harness {
    let clock = ManualClock::default();
    let repository = InMemoryAgentRegistry::new();
    let settings = RegistrySettings {
        page_size: 2,
        ..RegistrySettings::default()
    };
    let service = AgentRegistryService::with_settings(
        Arc::new(repository.clone()),
        Arc::new(clock.clone()),
        settings,
    );
    Harness {
        clock,
        repository,
        service,
    }
}

fn agent(agent_type: &str, instance: &str) -> AgentId {
    AgentId::new(agent_type, instance).expect("valid agent id")
}

fn ttl(seconds: u32) -> LivenessTtl {
    LivenessTtl::from_secs(seconds).expect("non-zero ttl")
}

fn fast_retry() -> StoreRetryPolicy {
    StoreRetryPolicy::new(
        3,
        Duration::from_millis(1),
        Duration::from_millis(1),
        Duration::from_secs(1),
    )
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn registered_agent_is_alive_until_ttl_lapses(harness: Harness) {
    let id = agent("worker", "w-1");
    harness
        .service
        .register(id.clone(), ttl(30), BTreeMap::new())
        .await
        .expect("register should succeed");

    assert!(harness.service.is_alive(&id).await.expect("liveness check"));

    harness.clock.advance(Duration::from_secs(31));
    assert!(!harness.service.is_alive(&id).await.expect("liveness check"));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_revives_lapsed_agent(harness: Harness) {
    let id = agent("worker", "w-1");
    harness
        .service
        .register(id.clone(), ttl(10), BTreeMap::new())
        .await
        .expect("register should succeed");
    harness.clock.advance(Duration::from_secs(11));
    assert!(!harness.service.is_alive(&id).await.expect("liveness check"));

    let renewed = harness
        .service
        .heartbeat(&id)
        .await
        .expect("heartbeat should succeed");

    assert_eq!(renewed.ttl(), ttl(10));
    assert!(harness.service.is_alive(&id).await.expect("liveness check"));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_registers_unknown_agent_with_default_ttl(harness: Harness) {
    let id = agent("worker", "fresh");

    let registration = harness
        .service
        .heartbeat(&id)
        .await
        .expect("heartbeat should register");

    assert_eq!(registration.ttl(), LivenessTtl::default());
    assert_eq!(registration.status(), RegistrationStatus::Active);
    assert!(harness.service.is_alive(&id).await.expect("liveness check"));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_after_deregister_starts_fresh_registration(harness: Harness) {
    let id = agent("worker", "w-1");
    let mut metadata = BTreeMap::new();
    metadata.insert("zone".to_owned(), "eu".to_owned());
    harness
        .service
        .register(id.clone(), ttl(90), metadata)
        .await
        .expect("register should succeed");
    harness
        .service
        .deregister(&id)
        .await
        .expect("deregister should succeed");

    let registration = harness
        .service
        .heartbeat(&id)
        .await
        .expect("heartbeat should re-register");

    assert_eq!(registration.ttl(), LivenessTtl::default());
    assert!(registration.metadata().is_empty());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn deregister_is_immediate(harness: Harness) {
    let id = agent("worker", "w-1");
    harness
        .service
        .register(id.clone(), ttl(300), BTreeMap::new())
        .await
        .expect("register should succeed");

    harness
        .service
        .deregister(&id)
        .await
        .expect("deregister should succeed");

    assert!(!harness.service.is_alive(&id).await.expect("liveness check"));
    let found = harness
        .service
        .find(&id)
        .await
        .expect("lookup should succeed")
        .expect("registration is kept");
    assert_eq!(found.status(), RegistrationStatus::Deregistered);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn deregister_unknown_agent_fails(harness: Harness) {
    let result = harness.service.deregister(&agent("worker", "ghost")).await;

    let err = result.expect_err("unknown agent must be rejected");
    assert!(matches!(err, AgentRegistryServiceError::UnknownAgent(_)));
    assert_eq!(err.kind(), ErrorKind::UnknownAgent);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn find_reports_effective_status(harness: Harness) {
    let id = agent("worker", "w-1");
    harness
        .service
        .register(id.clone(), ttl(5), BTreeMap::new())
        .await
        .expect("register should succeed");
    harness.clock.advance(Duration::from_secs(6));

    let found = harness
        .service
        .find(&id)
        .await
        .expect("lookup should succeed")
        .expect("registration exists");

    assert_eq!(found.status(), RegistrationStatus::Expired);
    assert_eq!(
        harness.service.find(&agent("worker", "none")).await.expect("lookup"),
        None
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn list_agents_pages_through_filtered_registrations(harness: Harness) {
    for instance in ["w-3", "w-1", "w-2", "w-4", "w-5"] {
        harness
            .service
            .register(agent("worker", instance), ttl(30), BTreeMap::new())
            .await
            .expect("register should succeed");
    }
    harness
        .service
        .register(agent("planner", "p-1"), ttl(30), BTreeMap::new())
        .await
        .expect("register should succeed");

    let workers: Vec<AgentRegistration> = harness
        .service
        .list_agents(Some("worker"))
        .expect("valid filter")
        .try_collect()
        .await
        .expect("listing should succeed");

    let instances: Vec<&str> = workers
        .iter()
        .map(|registration| registration.agent_id().instance())
        .collect();
    assert_eq!(instances, vec!["w-1", "w-2", "w-3", "w-4", "w-5"]);

    let everyone: Vec<AgentRegistration> = harness
        .service
        .list_agents(None)
        .expect("no filter")
        .try_collect()
        .await
        .expect("listing should succeed");
    assert_eq!(everyone.len(), 6);
}

#[rstest]
fn list_agents_rejects_invalid_filter(harness: Harness) {
    let result = harness.service.list_agents(Some("bad type"));
    assert!(matches!(result, Err(AgentRegistryServiceError::Domain(_))));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn reap_expired_persists_expiry_once(harness: Harness) {
    let short = agent("worker", "short");
    let long = agent("worker", "long");
    harness
        .service
        .register(short.clone(), ttl(5), BTreeMap::new())
        .await
        .expect("register should succeed");
    harness
        .service
        .register(long.clone(), ttl(60), BTreeMap::new())
        .await
        .expect("register should succeed");
    harness.clock.advance(Duration::from_secs(10));

    let reaped = harness.service.reap_expired().await.expect("reap should succeed");
    assert_eq!(reaped, vec![short]);

    let again = harness.service.reap_expired().await.expect("reap should succeed");
    assert!(again.is_empty());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn namespaces_do_not_observe_each_other(harness: Harness) {
    let id = agent("worker", "w-1");
    harness
        .service
        .register(id.clone(), ttl(30), BTreeMap::new())
        .await
        .expect("register should succeed");

    let other = AgentRegistryService::new(
        Arc::new(
            harness
                .repository
                .for_namespace(KeyNamespace::new("staging").expect("valid namespace")),
        ),
        Arc::new(harness.clock.clone()),
    );

    assert!(!other.is_alive(&id).await.expect("liveness check"));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn transient_faults_are_retried_until_success() {
    let mut repository = MockAgentRegistryRepository::new();
    let mut failures_left = 2_u32;
    repository.expect_find().times(3).returning(move |_| {
        if failures_left > 0 {
            failures_left -= 1;
            return Err(AgentRegistryError::unavailable(std::io::Error::other(
                "connection reset",
            )));
        }
        Ok(None)
    });
    let service = AgentRegistryService::with_settings(
        Arc::new(repository),
        Arc::new(ManualClock::default()),
        RegistrySettings {
            retry: fast_retry(),
            ..RegistrySettings::default()
        },
    );

    let alive = service
        .is_alive(&agent("worker", "w-1"))
        .await
        .expect("third attempt succeeds");
    assert!(!alive);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn persistent_transient_faults_surface_as_unavailable() {
    let mut repository = MockAgentRegistryRepository::new();
    repository.expect_upsert().times(3).returning(|_| {
        Err(AgentRegistryError::unavailable(std::io::Error::other(
            "connection refused",
        )))
    });
    let service = AgentRegistryService::with_settings(
        Arc::new(repository),
        Arc::new(ManualClock::default()),
        RegistrySettings {
            retry: fast_retry(),
            ..RegistrySettings::default()
        },
    );

    let err = service
        .register(agent("worker", "w-1"), ttl(30), BTreeMap::new())
        .await
        .expect_err("store stays down");

    assert!(matches!(
        err,
        AgentRegistryServiceError::CoordinationUnavailable(_)
    ));
    assert_eq!(err.kind(), ErrorKind::CoordinationUnavailable);
    assert!(err.kind().is_retryable());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn permanent_faults_are_not_retried() {
    let mut repository = MockAgentRegistryRepository::new();
    repository.expect_deregister().times(1).returning(|_, _| {
        Err(AgentRegistryError::invalid_persisted_data(
            std::io::Error::other("bad status"),
        ))
    });
    let service = AgentRegistryService::with_settings(
        Arc::new(repository),
        Arc::new(ManualClock::default()),
        RegistrySettings {
            retry: fast_retry(),
            ..RegistrySettings::default()
        },
    );

    let err = service
        .deregister(&agent("worker", "w-1"))
        .await
        .expect_err("corrupt row is permanent");

    assert_eq!(err.kind(), ErrorKind::Internal);
}
