//! Background sweeps wired to real services.

use super::helpers::{SharedStore, store};
use crate::test_helpers::agent;
use eyre::{OptionExt, Result};
use rstest::rstest;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use switchyard::coordinator::domain::{MessageStatus, Priority};
use switchyard::registry::domain::{LivenessTtl, RegistrationStatus};
use switchyard::registry::ports::AgentRegistryRepository;
use switchyard::sweeper::BackgroundSweeper;
use tokio_util::sync::CancellationToken;

#[rstest]
#[tokio::test(start_paused = true)]
async fn lease_sweeper_requeues_lapsed_messages(store: SharedStore) -> Result<()> {
    let node = store.node();
    let worker = agent("worker", "w-1");
    node.registry
        .register(worker.clone(), LivenessTtl::from_secs(300)?, BTreeMap::new())
        .await?;
    let receipt = node
        .coordinator
        .send_message(agent("planner", "p-1"), worker.clone(), Vec::new(), Priority::Normal, None)
        .await?;
    node.coordinator
        .receive_messages(&worker, 1, Duration::from_secs(5))
        .await?;
    store.clock.advance(Duration::from_secs(6));

    let sweeper = BackgroundSweeper::spawn(
        Arc::clone(&node.coordinator),
        Duration::from_secs(1),
        CancellationToken::new(),
    );
    tokio::time::sleep(Duration::from_millis(1500)).await;
    sweeper.shutdown().await?;

    let swept = node
        .coordinator
        .message(receipt.message_id)
        .await?
        .ok_or_eyre("message kept")?;
    assert_eq!(swept.status(), MessageStatus::Retrying);
    assert_eq!(swept.last_failure(), Some("lease expired"));
    Ok(())
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn reaper_persists_expiry(store: SharedStore) -> Result<()> {
    let node = store.node();
    let worker = agent("worker", "w-1");
    node.registry
        .register(worker.clone(), LivenessTtl::from_secs(5)?, BTreeMap::new())
        .await?;
    store.clock.advance(Duration::from_secs(6));
    let stored_before = store
        .registrations
        .find(&worker)
        .await?
        .ok_or_eyre("registration stored")?;
    assert_eq!(stored_before.status(), RegistrationStatus::Active);

    let reaper = BackgroundSweeper::spawn(
        Arc::clone(&node.registry),
        Duration::from_secs(1),
        CancellationToken::new(),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    reaper.shutdown().await?;

    let stored_after = store
        .registrations
        .find(&worker)
        .await?
        .ok_or_eyre("registration stored")?;
    assert_eq!(stored_after.status(), RegistrationStatus::Expired);
    Ok(())
}
