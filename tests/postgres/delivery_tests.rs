//! Delivery against the `PostgreSQL` mailbox store.

use super::helpers::{PgNode, node, shared_pool, unique_namespace};
use crate::test_helpers::{ManualClock, agent};
use eyre::{OptionExt, Result};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use switchyard::coordinator::{
    adapters::postgres::PostgresMailboxStore,
    domain::{Lease, Message, MessageStatus, NewMessage, Priority, RetryDecision},
    ports::MailboxRepository,
};
use switchyard::registry::domain::{AgentId, LivenessTtl};

const LEASE: Duration = Duration::from_secs(30);

async fn register(node: &PgNode, id: &AgentId) -> Result<()> {
    node.registry
        .register(id.clone(), LivenessTtl::from_secs(600)?, BTreeMap::new())
        .await?;
    Ok(())
}

async fn send(node: &PgNode, to: &AgentId, payload: &str, priority: Priority) -> Result<()> {
    node.coordinator
        .send_message(agent("planner", "p-1"), to.clone(), payload.as_bytes().to_vec(), priority, None)
        .await?;
    Ok(())
}

fn payloads(batch: &[Message]) -> Vec<&[u8]> {
    batch.iter().map(Message::payload).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn priority_then_enqueue_order() -> Result<()> {
    let Some(pool) = shared_pool().await? else {
        return Ok(());
    };
    let clock = ManualClock::default();
    let stack = node(&pool, &unique_namespace(), &clock);
    let worker = agent("worker", "w-1");
    register(&stack, &worker).await?;
    send(&stack, &worker, "first", Priority::High).await?;
    send(&stack, &worker, "second", Priority::Low).await?;
    send(&stack, &worker, "third", Priority::High).await?;

    let batch = stack.coordinator.receive_messages(&worker, 2, LEASE).await?;
    let rest = stack.coordinator.receive_messages(&worker, 2, LEASE).await?;

    assert_eq!(payloads(&batch), [b"first".as_slice(), b"third".as_slice()]);
    assert_eq!(payloads(&rest), [b"second".as_slice()]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_receivers_lease_disjoint_batches() -> Result<()> {
    let Some(pool) = shared_pool().await? else {
        return Ok(());
    };
    let clock = ManualClock::default();
    let namespace = unique_namespace();
    let nodes: Vec<PgNode> = (0..3).map(|_| node(&pool, &namespace, &clock)).collect();
    let worker = agent("worker", "shared");
    let first = nodes.first().ok_or_eyre("nodes built")?;
    register(first, &worker).await?;
    for n in 0..30 {
        send(first, &worker, &format!("job-{n}"), Priority::Normal).await?;
    }

    let receives = nodes
        .iter()
        .map(|stack| stack.coordinator.receive_messages(&worker, 10, LEASE));
    let batches = futures::future::try_join_all(receives).await?;

    let mut seen = HashSet::new();
    for message in batches.iter().flatten() {
        assert!(seen.insert(message.id()), "message {} leased twice", message.id());
    }
    assert_eq!(seen.len(), 30);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn nack_requeues_then_dead_letters_once() -> Result<()> {
    let Some(pool) = shared_pool().await? else {
        return Ok(());
    };
    let clock = ManualClock::default();
    let stack = node(&pool, &unique_namespace(), &clock);
    let worker = agent("worker", "w-1");
    register(&stack, &worker).await?;
    let receipt = stack
        .coordinator
        .send_message(agent("planner", "p-1"), worker.clone(), b"poison".to_vec(), Priority::Normal, Some(1))
        .await?;

    let mut decisions = Vec::new();
    for _ in 0..2 {
        let batch = stack.coordinator.receive_messages(&worker, 1, LEASE).await?;
        let leased = batch.first().ok_or_eyre("message leased")?;
        let token = leased.lease().ok_or_eyre("lease present")?.token();
        decisions.push(stack.coordinator.nack_message(leased.id(), token, "boom").await?);
        clock.advance(Duration::from_secs(5));
    }

    assert!(matches!(decisions.first(), Some(RetryDecision::Requeued { attempt_count: 1, .. })));
    assert!(matches!(decisions.get(1), Some(RetryDecision::DeadLettered { attempt_count: 2 })));
    let letters = stack.coordinator.dead_letters(Some(&worker)).await?;
    assert_eq!(letters.len(), 1);
    assert!(letters.iter().all(|entry| entry.message().id() == receipt.message_id));
    let depth = stack.coordinator.mailbox_depth(&worker).await?;
    assert_eq!((depth.queued, depth.in_flight), (0, 0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn sweep_requeues_lapsed_leases_at_the_back_of_their_band() -> Result<()> {
    let Some(pool) = shared_pool().await? else {
        return Ok(());
    };
    let clock = ManualClock::default();
    let stack = node(&pool, &unique_namespace(), &clock);
    let worker = agent("worker", "w-1");
    register(&stack, &worker).await?;
    send(&stack, &worker, "lapsed", Priority::Normal).await?;
    stack.coordinator.receive_messages(&worker, 1, LEASE).await?;
    send(&stack, &worker, "fresh", Priority::Normal).await?;

    clock.advance(LEASE + Duration::from_secs(1));
    let report = stack.coordinator.sweep_expired_leases().await?;
    clock.advance(Duration::from_secs(3));
    let batch = stack.coordinator.receive_messages(&worker, 5, LEASE).await?;

    assert_eq!((report.requeued, report.dead_lettered), (1, 0));
    assert_eq!(payloads(&batch), [b"fresh".as_slice(), b"lapsed".as_slice()]);
    let lapsed = batch.last().ok_or_eyre("lapsed message redelivered")?;
    assert_eq!(lapsed.attempt_count(), 1);
    assert_eq!(lapsed.status(), MessageStatus::InFlight);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn namespaces_share_tables_without_sharing_messages() -> Result<()> {
    let Some(pool) = shared_pool().await? else {
        return Ok(());
    };
    let clock = ManualClock::default();
    let blue = node(&pool, &unique_namespace(), &clock);
    let green = node(&pool, &unique_namespace(), &clock);
    let worker = agent("worker", "w-1");
    register(&blue, &worker).await?;
    register(&green, &worker).await?;
    send(&blue, &worker, "blue only", Priority::Critical).await?;

    assert!(green.coordinator.receive_messages(&worker, 5, LEASE).await?.is_empty());
    assert_eq!(blue.coordinator.receive_messages(&worker, 5, LEASE).await?.len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn replayed_enqueue_keeps_one_row() -> Result<()> {
    let Some(pool) = shared_pool().await? else {
        return Ok(());
    };
    let clock = ManualClock::default();
    let store = PostgresMailboxStore::new(pool.clone(), unique_namespace());
    let worker = agent("worker", "w-1");
    let message = Message::new(
        NewMessage {
            sender: agent("planner", "p-1"),
            recipient: worker.clone(),
            payload: b"once".to_vec(),
            priority: Priority::Normal,
            max_retries: 3,
        },
        &clock,
    );

    let first = store.enqueue(&message).await?;
    let replayed = store.enqueue(&message).await?;

    assert_eq!(replayed.id(), first.id());
    assert_eq!(replayed.enqueue_seq(), first.enqueue_seq());
    assert_eq!(store.depth(&worker).await?.queued, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn settled_messages_are_purged_after_retention() -> Result<()> {
    let Some(pool) = shared_pool().await? else {
        return Ok(());
    };
    let clock = ManualClock::default();
    let stack = node(&pool, &unique_namespace(), &clock);
    let worker = agent("worker", "w-1");
    register(&stack, &worker).await?;
    send(&stack, &worker, "done", Priority::Normal).await?;
    let batch = stack.coordinator.receive_messages(&worker, 1, LEASE).await?;
    let leased = batch.first().ok_or_eyre("one message leased")?;
    let token = leased.lease().map(Lease::token).ok_or_eyre("leased")?;
    stack.coordinator.ack_message(leased.id(), token).await?;

    assert_eq!(stack.coordinator.purge_settled_messages().await?, 0);
    clock.advance(Duration::from_secs(86_401));
    assert_eq!(stack.coordinator.purge_settled_messages().await?, 1);
    assert!(stack.coordinator.message(leased.id()).await?.is_none());
    Ok(())
}
