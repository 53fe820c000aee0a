//! Then steps for message delivery scenarios.

use super::world::{DeliveryWorld, LEASE, run_async};
use eyre::{WrapErr, eyre};
use rstest_bdd_macros::then;
use switchyard::ErrorKind;
use switchyard::registry::domain::AgentId;

#[then(r#"the received payloads are "{expected}""#)]
fn received_payloads(world: &DeliveryWorld, expected: String) -> Result<(), eyre::Report> {
    let payloads: Vec<String> = world
        .received
        .iter()
        .map(|message| String::from_utf8_lossy(message.payload()).into_owned())
        .collect();
    let wanted: Vec<&str> = expected.split(',').collect();
    if payloads != wanted {
        return Err(eyre!("expected payloads {wanted:?}, received {payloads:?}"));
    }
    Ok(())
}

#[then("every received message is on attempt {attempt:u32}")]
fn received_attempt(world: &DeliveryWorld, attempt: u32) -> Result<(), eyre::Report> {
    if let Some(message) = world
        .received
        .iter()
        .find(|message| message.attempt_count() != attempt)
    {
        return Err(eyre!(
            "message {} is on attempt {}, expected {attempt}",
            message.id(),
            message.attempt_count()
        ));
    }
    Ok(())
}

#[then(r#"the dead letters for "{agent}" hold "{payload}" exactly once"#)]
fn dead_letters_hold(world: &DeliveryWorld, agent: String, payload: String) -> Result<(), eyre::Report> {
    let recipient: AgentId = agent.parse().wrap_err("parse recipient")?;
    let letters = run_async(world.coordinator.dead_letters(Some(&recipient)))
        .wrap_err("list dead letters")?;
    let matching = letters
        .iter()
        .filter(|entry| entry.message().payload() == payload.as_bytes())
        .count();
    if matching != 1 {
        return Err(eyre!("expected one dead letter carrying {payload:?}, found {matching}"));
    }
    Ok(())
}

#[then(r#"the mailbox of "{agent}" is empty"#)]
fn mailbox_empty(world: &DeliveryWorld, agent: String) -> Result<(), eyre::Report> {
    let recipient: AgentId = agent.parse().wrap_err("parse recipient")?;
    let depth = run_async(world.coordinator.mailbox_depth(&recipient)).wrap_err("mailbox depth")?;
    if depth.queued != 0 || depth.in_flight != 0 {
        return Err(eyre!("expected an empty mailbox, found {depth:?}"));
    }
    Ok(())
}

#[then(r#"receiving for "{agent}" fails because the route is unavailable"#)]
fn receive_route_unavailable(world: &DeliveryWorld, agent: String) -> Result<(), eyre::Report> {
    let receiver: AgentId = agent.parse().wrap_err("parse receiver")?;
    match run_async(world.coordinator.receive_messages(&receiver, 5, LEASE)) {
        Ok(batch) => Err(eyre!("expected the receive to fail, got {} messages", batch.len())),
        Err(err) if err.kind() == ErrorKind::RouteUnavailable => Ok(()),
        Err(err) => Err(eyre!("expected route unavailable, got {err}")),
    }
}
