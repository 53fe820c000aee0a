//! Circuit state against the `PostgreSQL` store.

use super::helpers::{breaker_policy, node, shared_pool, unique_namespace};
use crate::test_helpers::{ManualClock, agent};
use eyre::Result;
use std::time::Duration;
use switchyard::breaker::domain::{Admission, CircuitPhase, CircuitSubject};

#[tokio::test(flavor = "multi_thread")]
async fn trip_is_visible_to_every_node_until_a_probe_succeeds() -> Result<()> {
    let Some(pool) = shared_pool().await? else {
        return Ok(());
    };
    let clock = ManualClock::default();
    let namespace = unique_namespace();
    let node_a = node(&pool, &namespace, &clock);
    let node_b = node(&pool, &namespace, &clock);
    let subject = CircuitSubject::agent(agent("worker", "flaky"));
    for _ in 0..breaker_policy().failure_threshold {
        node_a.breaker.record_failure(&subject).await?;
    }

    assert!(!node_b.breaker.check(&subject).await?.is_admitted());
    clock.advance(Duration::from_secs(10));
    assert_eq!(node_b.breaker.check(&subject).await?, Admission::Probe);
    node_b.breaker.acquire(&subject).await?;
    node_b.breaker.record_success(&subject).await?;

    assert_eq!(node_a.breaker.state(&subject).await?.phase(), CircuitPhase::Closed);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_are_all_counted() -> Result<()> {
    let Some(pool) = shared_pool().await? else {
        return Ok(());
    };
    let clock = ManualClock::default();
    let namespace = unique_namespace();
    let stack = node(&pool, &namespace, &clock);
    let subject = CircuitSubject::agent(agent("worker", "contended"));
    stack.breaker.state(&subject).await?;

    let writers = (0..2).map(|_| node(&pool, &namespace, &clock));
    let records = writers.map(|writer| {
        let target = subject.clone();
        tokio::spawn(async move { writer.breaker.record_failure(&target).await })
    });
    for handle in futures::future::join_all(records).await {
        handle??;
    }

    let state = stack.breaker.state(&subject).await?;
    assert_eq!(state.consecutive_failures(), 2);
    assert_eq!(state.phase(), CircuitPhase::Closed);
    Ok(())
}
