//! Message lifecycle status.

use super::ParseMessageStatusError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Queued and leasable.
    Pending,
    /// Leased to a receiver.
    InFlight,
    /// Acknowledged. Terminal.
    Delivered,
    /// Queued again after a failure, waiting out its backoff.
    Retrying,
    /// Exhausted its retries. Terminal.
    DeadLettered,
}

impl MessageStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Delivered => "delivered",
            Self::Retrying => "retrying",
            Self::DeadLettered => "dead_lettered",
        }
    }

    /// Returns `true` for statuses that admit no further transition.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::DeadLettered)
    }

    /// Returns `true` for statuses held by messages waiting in a mailbox.
    #[must_use]
    pub const fn is_queued(self) -> bool {
        matches!(self, Self::Pending | Self::Retrying)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for MessageStatus {
    type Error = ParseMessageStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "delivered" => Ok(Self::Delivered),
            "retrying" => Ok(Self::Retrying),
            "dead_lettered" => Ok(Self::DeadLettered),
            _ => Err(ParseMessageStatusError(value.to_owned())),
        }
    }
}
