//! Given steps for message delivery scenarios.

use super::world::{DeliveryWorld, run_async};
use eyre::WrapErr;
use rstest_bdd_macros::given;
use std::collections::BTreeMap;
use switchyard::registry::domain::{AgentId, LivenessTtl};

#[given(r#"agent "{agent}" is registered with a {ttl:u32} second TTL"#)]
fn agent_registered(world: &mut DeliveryWorld, agent: String, ttl: u32) -> Result<(), eyre::Report> {
    let agent_id: AgentId = agent.parse().wrap_err("parse agent id")?;
    let liveness = LivenessTtl::from_secs(ttl).wrap_err("valid ttl")?;
    run_async(world.registry.register(agent_id, liveness, BTreeMap::new()))
        .wrap_err("register agent")?;
    Ok(())
}
