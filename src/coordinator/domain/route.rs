//! Delivery route gating.

use crate::breaker::domain::CircuitSubject;
use crate::registry::domain::AgentId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Granularity at which delivery health is tracked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteScope {
    /// One circuit per recipient, shared by all senders.
    #[default]
    Recipient,
    /// One circuit per sender/recipient pair.
    Pair,
}

impl RouteScope {
    /// Returns the circuit subject guarding delivery from `sender` to
    /// `recipient`.
    #[must_use]
    pub fn subject(self, sender: &AgentId, recipient: &AgentId) -> CircuitSubject {
        match self {
            Self::Recipient => CircuitSubject::agent(recipient.clone()),
            Self::Pair => CircuitSubject::route(sender.clone(), recipient.clone()),
        }
    }
}

/// Why a route is not currently delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteBlock {
    /// The recipient has no live registration.
    RecipientNotAlive,
    /// The route's circuit is rejecting calls.
    CircuitOpen,
}

impl fmt::Display for RouteBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RecipientNotAlive => "recipient is not alive",
            Self::CircuitOpen => "circuit is open",
        })
    }
}

/// Route health reported to a sender alongside a successful enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    /// The recipient can receive now.
    Available,
    /// The message is queued but will not be delivered until the route
    /// recovers.
    Unavailable(RouteBlock),
}

impl RouteStatus {
    /// Returns `true` when the route can deliver now.
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }
}
