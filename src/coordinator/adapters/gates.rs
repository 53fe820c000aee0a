//! Gate adapters backed by the in-process registry and breaker services.

use crate::breaker::{
    domain::{CircuitSubject, ProbePermit},
    ports::CircuitStateRepository,
    services::{BreakerServiceError, CircuitBreakerService},
};
use crate::coordinator::ports::{AgentLiveness, GateError, RouteGrant, RouteHealth};
use crate::registry::{
    domain::AgentId, ports::AgentRegistryRepository, services::AgentRegistryService,
};
use async_trait::async_trait;
use mockable::Clock;

const LIVENESS_GATE: &str = "liveness";
const ROUTE_GATE: &str = "route";

#[async_trait]
impl<R, C> AgentLiveness for AgentRegistryService<R, C>
where
    R: AgentRegistryRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    async fn is_alive(&self, agent: &AgentId) -> Result<bool, GateError> {
        Self::is_alive(self, agent)
            .await
            .map_err(|err| GateError::new(LIVENESS_GATE, err.kind(), err))
    }
}

#[async_trait]
impl<R, C> RouteHealth for CircuitBreakerService<R, C>
where
    R: CircuitStateRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    async fn is_admitting(&self, subject: &CircuitSubject) -> Result<bool, GateError> {
        self.check(subject)
            .await
            .map(|admission| admission.is_admitted())
            .map_err(|err| GateError::new(ROUTE_GATE, err.kind(), err))
    }

    async fn acquire(&self, subject: &CircuitSubject) -> Result<RouteGrant, GateError> {
        match Self::acquire(self, subject).await {
            Ok(ProbePermit::Normal) => Ok(RouteGrant::Pass),
            Ok(ProbePermit::Probe) => Ok(RouteGrant::Trial),
            Err(BreakerServiceError::CircuitOpen { .. }) => Ok(RouteGrant::Blocked),
            Err(err) => Err(GateError::new(ROUTE_GATE, err.kind(), err)),
        }
    }

    async fn release_slot(&self, subject: &CircuitSubject) -> Result<(), GateError> {
        Self::release_slot(self, subject)
            .await
            .map(drop)
            .map_err(|err| GateError::new(ROUTE_GATE, err.kind(), err))
    }

    async fn record_success(&self, subject: &CircuitSubject) -> Result<(), GateError> {
        Self::record_success(self, subject)
            .await
            .map(drop)
            .map_err(|err| GateError::new(ROUTE_GATE, err.kind(), err))
    }

    async fn record_failure(&self, subject: &CircuitSubject) -> Result<(), GateError> {
        Self::record_failure(self, subject)
            .await
            .map(drop)
            .map_err(|err| GateError::new(ROUTE_GATE, err.kind(), err))
    }
}
