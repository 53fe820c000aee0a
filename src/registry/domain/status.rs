//! Registration lifecycle status.

use super::ParseRegistrationStatusError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an agent registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// The agent is heartbeating within its TTL.
    Active,
    /// The liveness marker lapsed without a heartbeat.
    Expired,
    /// The agent explicitly left the registry.
    Deregistered,
}

impl RegistrationStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Deregistered => "deregistered",
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for RegistrationStatus {
    type Error = ParseRegistrationStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "deregistered" => Ok(Self::Deregistered),
            _ => Err(ParseRegistrationStatusError(value.to_owned())),
        }
    }
}
