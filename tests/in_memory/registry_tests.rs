//! Registry behaviour observed from several nodes.

use super::helpers::{SharedStore, fast_retry, store};
use crate::test_helpers::agent;
use eyre::{OptionExt, Result};
use futures::TryStreamExt;
use rstest::rstest;
use std::collections::BTreeMap;
use std::time::Duration;
use switchyard::registry::domain::{AgentRegistration, LivenessTtl, RegistrationStatus};
use switchyard::registry::services::RegistrySettings;

#[rstest]
#[tokio::test]
async fn heartbeat_on_any_node_keeps_an_agent_alive(store: SharedStore) -> Result<()> {
    let node_a = store.node();
    let node_b = store.node();
    let worker = agent("worker", "w-1");
    node_a
        .registry
        .register(worker.clone(), LivenessTtl::from_secs(10)?, BTreeMap::new())
        .await?;

    store.clock.advance(Duration::from_secs(8));
    node_b.registry.heartbeat(&worker).await?;
    store.clock.advance(Duration::from_secs(8));
    assert!(node_a.registry.is_alive(&worker).await?);

    store.clock.advance(Duration::from_secs(3));
    assert!(!node_a.registry.is_alive(&worker).await?);
    let observed = node_b.registry.find(&worker).await?.ok_or_eyre("registration kept")?;
    assert_eq!(observed.status(), RegistrationStatus::Expired);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn listing_pages_through_every_registration(store: SharedStore) -> Result<()> {
    let node = store.node_with(RegistrySettings {
        page_size: 2,
        retry: fast_retry(),
        ..RegistrySettings::default()
    });
    let ttl = LivenessTtl::from_secs(30)?;
    for (agent_type, instance) in [
        ("worker", "w-3"),
        ("planner", "p-1"),
        ("worker", "w-1"),
        ("critic", "c-1"),
        ("worker", "w-2"),
    ] {
        node.registry
            .register(agent(agent_type, instance), ttl, BTreeMap::new())
            .await?;
    }

    let everyone: Vec<AgentRegistration> = node.registry.list_agents(None)?.try_collect().await?;
    let workers: Vec<AgentRegistration> =
        node.registry.list_agents(Some("worker"))?.try_collect().await?;

    let listed: Vec<String> = everyone
        .iter()
        .map(|registration| registration.agent_id().to_string())
        .collect();
    assert_eq!(
        listed,
        ["critic/c-1", "planner/p-1", "worker/w-1", "worker/w-2", "worker/w-3"]
    );
    assert_eq!(workers.len(), 3);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn heartbeat_after_deregistration_registers_afresh(store: SharedStore) -> Result<()> {
    let node = store.node();
    let worker = agent("worker", "w-1");
    node.registry
        .register(worker.clone(), LivenessTtl::from_secs(5)?, BTreeMap::new())
        .await?;
    node.registry.deregister(&worker).await?;
    assert!(!node.registry.is_alive(&worker).await?);

    let renewed = node.registry.heartbeat(&worker).await?;

    assert_eq!(renewed.status(), RegistrationStatus::Active);
    assert_eq!(renewed.ttl(), node.registry.settings().default_ttl);
    assert!(node.registry.is_alive(&worker).await?);
    Ok(())
}
