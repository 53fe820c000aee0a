//! Registry against the `PostgreSQL` store.

use super::helpers::{node, shared_pool, unique_namespace};
use crate::test_helpers::{ManualClock, agent};
use eyre::{OptionExt, Result};
use futures::TryStreamExt;
use std::collections::BTreeMap;
use std::time::Duration;
use switchyard::registry::domain::{AgentRegistration, LivenessTtl, RegistrationStatus};

#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_extends_liveness_and_reaping_persists_expiry() -> Result<()> {
    let Some(pool) = shared_pool().await? else {
        return Ok(());
    };
    let clock = ManualClock::default();
    let stack = node(&pool, &unique_namespace(), &clock);
    let worker = agent("worker", "w-1");
    let metadata = BTreeMap::from([("zone".to_owned(), "eu-west".to_owned())]);
    stack
        .registry
        .register(worker.clone(), LivenessTtl::from_secs(10)?, metadata.clone())
        .await?;

    clock.advance(Duration::from_secs(8));
    stack.registry.heartbeat(&worker).await?;
    clock.advance(Duration::from_secs(8));
    assert!(stack.registry.is_alive(&worker).await?);

    clock.advance(Duration::from_secs(5));
    let reaped = stack.registry.reap_expired().await?;
    assert_eq!(reaped, [worker.clone()]);
    let stored = stack.registry.find(&worker).await?.ok_or_eyre("registration kept")?;
    assert_eq!(stored.status(), RegistrationStatus::Expired);
    assert_eq!(stored.metadata(), &metadata);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn listing_walks_pages_in_identity_order() -> Result<()> {
    let Some(pool) = shared_pool().await? else {
        return Ok(());
    };
    let clock = ManualClock::default();
    let stack = node(&pool, &unique_namespace(), &clock);
    let ttl = LivenessTtl::from_secs(30)?;
    for (agent_type, instance) in [("worker", "b"), ("critic", "a"), ("worker", "a"), ("worker", "c")] {
        stack
            .registry
            .register(agent(agent_type, instance), ttl, BTreeMap::new())
            .await?;
    }

    let listed: Vec<AgentRegistration> = stack.registry.list_agents(None)?.try_collect().await?;
    let workers: Vec<AgentRegistration> =
        stack.registry.list_agents(Some("worker"))?.try_collect().await?;

    let names: Vec<String> = listed
        .iter()
        .map(|registration| registration.agent_id().to_string())
        .collect();
    assert_eq!(names, ["critic/a", "worker/a", "worker/b", "worker/c"]);
    assert_eq!(workers.len(), 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn deregistered_agent_is_dead_until_it_heartbeats() -> Result<()> {
    let Some(pool) = shared_pool().await? else {
        return Ok(());
    };
    let clock = ManualClock::default();
    let stack = node(&pool, &unique_namespace(), &clock);
    let worker = agent("worker", "w-1");
    stack
        .registry
        .register(worker.clone(), LivenessTtl::from_secs(60)?, BTreeMap::new())
        .await?;

    stack.registry.deregister(&worker).await?;
    assert!(!stack.registry.is_alive(&worker).await?);
    stack.registry.heartbeat(&worker).await?;
    assert!(stack.registry.is_alive(&worker).await?);
    Ok(())
}
