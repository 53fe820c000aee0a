//! Circuit state shared between nodes.

use super::helpers::{SharedStore, breaker_policy, store};
use crate::test_helpers::agent;
use eyre::{Result, bail};
use rstest::rstest;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use switchyard::breaker::domain::{CircuitPhase, CircuitSubject};
use switchyard::breaker::services::WrapError;
use switchyard::ErrorKind;

fn flaky_peer() -> CircuitSubject {
    CircuitSubject::route(agent("planner", "p-1"), agent("worker", "flaky"))
}

#[rstest]
#[tokio::test]
async fn a_trip_on_one_node_rejects_calls_on_another(store: SharedStore) -> Result<()> {
    let node_a = store.node();
    let node_b = store.node();
    let subject = flaky_peer();
    for _ in 0..breaker_policy().failure_threshold {
        node_a.breaker.record_failure(&subject).await?;
    }

    let invoked = AtomicU32::new(0);
    let outcome = node_b
        .breaker
        .wrap(&subject, || async {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(())
        })
        .await;

    let Err(err) = outcome else {
        bail!("call admitted through an open circuit");
    };
    assert_eq!(err.kind(), Some(ErrorKind::CircuitOpen));
    assert!(matches!(
        err,
        WrapError::CircuitOpen { retry_after, .. } if retry_after == Duration::from_secs(10)
    ));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn probe_on_another_node_closes_the_circuit(store: SharedStore) -> Result<()> {
    let node_a = store.node();
    let node_b = store.node();
    let subject = flaky_peer();
    for _ in 0..breaker_policy().failure_threshold {
        node_a.breaker.record_failure(&subject).await?;
    }

    store.clock.advance(Duration::from_secs(10));
    assert_eq!(node_a.breaker.state(&subject).await?.phase(), CircuitPhase::HalfOpen);
    node_b
        .breaker
        .wrap(&subject, || async { Ok::<_, std::io::Error>("pong") })
        .await?;

    let state = node_a.breaker.state(&subject).await?;
    assert_eq!(state.phase(), CircuitPhase::Closed);
    assert_eq!(state.consecutive_failures(), 0);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn failed_probes_grow_the_cooldown_up_to_the_ceiling(store: SharedStore) -> Result<()> {
    let node = store.node();
    let subject = flaky_peer();
    for _ in 0..breaker_policy().failure_threshold {
        node.breaker.record_failure(&subject).await?;
    }

    let mut cooldowns = Vec::new();
    for _ in 0..3 {
        let wait = node.breaker.state(&subject).await?.cooldown_seconds();
        store.clock.advance(Duration::from_secs(u64::from(wait)));
        let probe = node
            .breaker
            .wrap(&subject, || async { Err::<(), _>(std::io::Error::other("still down")) })
            .await;
        assert!(matches!(probe, Err(WrapError::Operation(_))));
        cooldowns.push(node.breaker.state(&subject).await?.cooldown_seconds());
    }

    assert_eq!(cooldowns, [20, 40, 40]);
    assert_eq!(node.breaker.state(&subject).await?.trip_count(), 4);
    Ok(())
}
