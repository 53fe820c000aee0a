//! Delivery gates: receiver liveness and route health.

use crate::breaker::domain::CircuitSubject;
use crate::error::ErrorKind;
use crate::registry::domain::AgentId;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a gate consultation.
#[derive(Debug, Clone, Error)]
#[error("{gate} gate failed: {source}")]
pub struct GateError {
    gate: &'static str,
    kind: ErrorKind,
    source: Arc<dyn std::error::Error + Send + Sync>,
}

impl GateError {
    /// Wraps a failure of the named gate, keeping its classification.
    pub fn new(
        gate: &'static str,
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            gate,
            kind,
            source: Arc::new(source),
        }
    }

    /// Returns the gate that failed.
    #[must_use]
    pub const fn gate(&self) -> &'static str {
        self.gate
    }

    /// Returns the classification of the underlying failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Answers whether an agent is currently alive.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentLiveness: Send + Sync {
    /// Returns `true` iff `agent` has a live registration.
    async fn is_alive(&self, agent: &AgentId) -> Result<bool, GateError>;
}

/// Outcome of asking a route circuit for a delivery slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteGrant {
    /// The circuit is closed; deliveries are not limited.
    Pass,
    /// The circuit is half-open and one trial slot was taken.
    Trial,
    /// The circuit rejects deliveries.
    Blocked,
}

/// Consults and updates route circuits.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RouteHealth: Send + Sync {
    /// Returns `true` when the circuit for `subject` admits calls, without
    /// consuming a probe slot.
    async fn is_admitting(&self, subject: &CircuitSubject) -> Result<bool, GateError>;

    /// Takes a delivery slot on `subject`. A half-open circuit hands out one
    /// trial slot per call.
    async fn acquire(&self, subject: &CircuitSubject) -> Result<RouteGrant, GateError>;

    /// Returns a trial slot taken by [`Self::acquire`] that carried no
    /// message.
    async fn release_slot(&self, subject: &CircuitSubject) -> Result<(), GateError>;

    /// Records a delivered message against `subject`.
    async fn record_success(&self, subject: &CircuitSubject) -> Result<(), GateError>;

    /// Records a failed delivery against `subject`.
    async fn record_failure(&self, subject: &CircuitSubject) -> Result<(), GateError>;
}
