//! Circuit phase.

use super::ParseCircuitPhaseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three states of the breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    /// Normal operation; all calls pass.
    Closed,
    /// Tripped; all calls are rejected until the cooldown elapses.
    Open,
    /// Recovering; a bounded number of probe calls pass.
    HalfOpen,
}

impl CircuitPhase {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for CircuitPhase {
    type Error = ParseCircuitPhaseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "half_open" => Ok(Self::HalfOpen),
            _ => Err(ParseCircuitPhaseError(value.to_owned())),
        }
    }
}
