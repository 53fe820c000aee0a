//! Delivery across nodes sharing one mailbox store.

use super::helpers::{Node, SharedStore, store};
use crate::test_helpers::agent;
use eyre::{OptionExt, Result};
use rstest::rstest;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use switchyard::coordinator::domain::{
    Message, MessageId, MessageStatus, Priority, RouteStatus,
};
use switchyard::registry::domain::{AgentId, LivenessTtl};

const LEASE: Duration = Duration::from_secs(30);

async fn register(node: &Node, id: &AgentId) -> Result<()> {
    node.registry
        .register(id.clone(), LivenessTtl::from_secs(60)?, BTreeMap::new())
        .await?;
    Ok(())
}

fn ids(batch: &[Message]) -> HashSet<MessageId> {
    batch.iter().map(Message::id).collect()
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nodes_never_lease_the_same_message(store: SharedStore) -> Result<()> {
    let node_a = store.node();
    let node_b = store.node();
    let receiver = agent("worker", "shared");
    register(&node_a, &receiver).await?;
    for n in 0..20_u8 {
        node_a
            .coordinator
            .send_message(agent("planner", "p"), receiver.clone(), vec![n], Priority::Normal, None)
            .await?;
    }

    let (from_a, from_b) = tokio::join!(
        node_a.coordinator.receive_messages(&receiver, 15, LEASE),
        node_b.coordinator.receive_messages(&receiver, 15, LEASE),
    );
    let (batch_a, batch_b) = (from_a?, from_b?);

    assert_eq!(batch_a.len() + batch_b.len(), 20);
    assert!(ids(&batch_a).is_disjoint(&ids(&batch_b)));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn message_leased_on_one_node_is_acked_on_another(store: SharedStore) -> Result<()> {
    let node_a = store.node();
    let node_b = store.node();
    let receiver = agent("worker", "w-1");
    register(&node_b, &receiver).await?;

    let receipt = node_a
        .coordinator
        .send_message(agent("planner", "p"), receiver.clone(), b"job".to_vec(), Priority::High, None)
        .await?;
    assert_eq!(receipt.route, RouteStatus::Available);

    let batch = node_b.coordinator.receive_messages(&receiver, 10, LEASE).await?;
    let leased = batch.first().ok_or_eyre("one message leased")?;
    let token = leased.lease().ok_or_eyre("leased message carries a lease")?.token();
    node_a.coordinator.ack_message(leased.id(), token).await?;

    let stored = node_b
        .coordinator
        .message(receipt.message_id)
        .await?
        .ok_or_eyre("message still readable")?;
    assert_eq!(stored.status(), MessageStatus::Delivered);
    let depth = node_a.coordinator.mailbox_depth(&receiver).await?;
    assert_eq!((depth.queued, depth.in_flight), (0, 0));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn namespaces_isolate_deployments(store: SharedStore) -> Result<()> {
    let blue = store.namespaced("blue").node();
    let green = store.namespaced("green").node();
    let receiver = agent("worker", "w-1");
    register(&blue, &receiver).await?;
    register(&green, &receiver).await?;

    blue.coordinator
        .send_message(agent("planner", "p"), receiver.clone(), Vec::new(), Priority::Normal, None)
        .await?;

    assert!(green.coordinator.receive_messages(&receiver, 10, LEASE).await?.is_empty());
    assert_eq!(blue.coordinator.mailbox_depth(&receiver).await?.queued, 1);
    assert_eq!(blue.coordinator.receive_messages(&receiver, 10, LEASE).await?.len(), 1);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn lapsed_lease_swept_by_another_node_is_redelivered(store: SharedStore) -> Result<()> {
    let worker_node = store.node();
    let sweeper_node = store.node();
    let receiver = agent("worker", "w-1");
    register(&worker_node, &receiver).await?;
    let receipt = worker_node
        .coordinator
        .send_message(agent("planner", "p"), receiver.clone(), b"retry me".to_vec(), Priority::Normal, None)
        .await?;
    worker_node.coordinator.receive_messages(&receiver, 1, LEASE).await?;

    store.clock.advance(LEASE + Duration::from_secs(1));
    let report = sweeper_node.coordinator.sweep_expired_leases().await?;
    assert_eq!((report.requeued, report.dead_lettered), (1, 0));

    store.clock.advance(Duration::from_secs(3));
    worker_node.registry.heartbeat(&receiver).await?;
    let redelivered = worker_node.coordinator.receive_messages(&receiver, 1, LEASE).await?;
    let message = redelivered.first().ok_or_eyre("message redelivered")?;
    assert_eq!(message.id(), receipt.message_id);
    assert_eq!(message.attempt_count(), 1);
    assert_eq!(message.payload(), b"retry me");
    Ok(())
}
