//! Circuit subjects.

use crate::registry::domain::AgentId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a circuit protects: calls to one agent, or calls along one
/// sender-to-recipient route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CircuitSubject {
    /// Every call to the agent.
    Agent {
        /// The protected agent.
        agent: AgentId,
    },
    /// Calls from `sender` to `recipient`.
    Route {
        /// Calling agent.
        sender: AgentId,
        /// Called agent.
        recipient: AgentId,
    },
}

impl CircuitSubject {
    /// Creates a subject covering every call to `agent`.
    #[must_use]
    pub const fn agent(agent: AgentId) -> Self {
        Self::Agent { agent }
    }

    /// Creates a subject covering calls from `sender` to `recipient`.
    #[must_use]
    pub const fn route(sender: AgentId, recipient: AgentId) -> Self {
        Self::Route { sender, recipient }
    }

    /// Returns the stable storage key, also used to look up per-subject
    /// policy overrides.
    ///
    /// ```
    /// use switchyard::breaker::domain::CircuitSubject;
    /// use switchyard::registry::domain::AgentId;
    ///
    /// let a = AgentId::new("planner", "p1").unwrap();
    /// let b = AgentId::new("worker", "w1").unwrap();
    /// assert_eq!(CircuitSubject::agent(b.clone()).key(), "agent:worker/w1");
    /// assert_eq!(CircuitSubject::route(a, b).key(), "route:planner/p1->worker/w1");
    /// ```
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Agent { agent } => format!("agent:{agent}"),
            Self::Route { sender, recipient } => format!("route:{sender}->{recipient}"),
        }
    }
}

impl fmt::Display for CircuitSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
