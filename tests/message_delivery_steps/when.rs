//! When steps for message delivery scenarios.

use super::world::{DeliveryWorld, LEASE, run_async};
use eyre::{WrapErr, eyre};
use rstest_bdd_macros::when;
use std::time::Duration;
use switchyard::coordinator::domain::Priority;
use switchyard::registry::domain::AgentId;

fn send(
    world: &DeliveryWorld,
    sender: &str,
    payload: &str,
    recipient: &str,
    priority: &str,
    max_retries: Option<u32>,
) -> Result<(), eyre::Report> {
    let from: AgentId = sender.parse().wrap_err("parse sender")?;
    let to: AgentId = recipient.parse().wrap_err("parse recipient")?;
    let level: Priority = priority.parse().wrap_err("parse priority")?;
    run_async(world.coordinator.send_message(
        from,
        to,
        payload.as_bytes().to_vec(),
        level,
        max_retries,
    ))
    .wrap_err("send message")?;
    Ok(())
}

#[when(r#""{sender}" sends "{payload}" to "{recipient}" with {priority} priority"#)]
fn sends_message(
    world: &mut DeliveryWorld,
    sender: String,
    payload: String,
    recipient: String,
    priority: String,
) -> Result<(), eyre::Report> {
    send(world, &sender, &payload, &recipient, &priority, None)
}

#[when(r#""{sender}" sends "{payload}" to "{recipient}" with {priority} priority and {retries:u32} retry"#)]
fn sends_message_with_retries(
    world: &mut DeliveryWorld,
    sender: String,
    payload: String,
    recipient: String,
    priority: String,
    retries: u32,
) -> Result<(), eyre::Report> {
    send(world, &sender, &payload, &recipient, &priority, Some(retries))
}

#[when(r#""{agent}" receives up to {count:usize} messages"#)]
fn receives_messages(world: &mut DeliveryWorld, agent: String, count: usize) -> Result<(), eyre::Report> {
    let receiver: AgentId = agent.parse().wrap_err("parse receiver")?;
    world.received = run_async(world.coordinator.receive_messages(&receiver, count, LEASE))
        .wrap_err("receive messages")?;
    Ok(())
}

#[when(r#""{agent}" rejects the received messages"#)]
fn rejects_messages(world: &mut DeliveryWorld, agent: String) -> Result<(), eyre::Report> {
    if world.received.is_empty() {
        return Err(eyre!("{agent} has nothing to reject"));
    }
    for message in &world.received {
        let lease = message
            .lease()
            .ok_or_else(|| eyre!("received message {} has no lease", message.id()))?;
        run_async(
            world
                .coordinator
                .nack_message(message.id(), lease.token(), "handler failed"),
        )
        .wrap_err("nack message")?;
    }
    Ok(())
}

#[when(r#""{agent}" sends a heartbeat"#)]
fn sends_heartbeat(world: &mut DeliveryWorld, agent: String) -> Result<(), eyre::Report> {
    let agent_id: AgentId = agent.parse().wrap_err("parse agent id")?;
    run_async(world.registry.heartbeat(&agent_id)).wrap_err("heartbeat")?;
    Ok(())
}

#[when("{seconds:u64} seconds pass")]
fn seconds_pass(world: &mut DeliveryWorld, seconds: u64) {
    world.clock.advance(Duration::from_secs(seconds));
}

#[when("the lease sweep runs")]
fn lease_sweep_runs(world: &mut DeliveryWorld) -> Result<(), eyre::Report> {
    run_async(world.coordinator.sweep_expired_leases()).wrap_err("sweep expired leases")?;
    Ok(())
}
