//! Stable error classification shared by every coordination service.
//!
//! Each service error exposes `kind()`, so callers can branch on a small
//! closed taxonomy without matching on per-context error enums.

use crate::store::StoreFault;
use std::fmt;

/// Stable classification of a coordination failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The referenced agent has no registration.
    UnknownAgent,
    /// A payload exceeds the configured size bound.
    MessageTooLarge,
    /// A priority outside the defined levels was supplied.
    InvalidPriority,
    /// Any other input validation failure.
    InvalidInput,
    /// The shared store could not be reached after the retry ceiling.
    CoordinationUnavailable,
    /// A circuit rejected the call without invoking it.
    CircuitOpen,
    /// The recipient is not alive or its circuit is open; messages stay
    /// queued.
    RouteUnavailable,
    /// The caller's lease lapsed before the call.
    LeaseExpired,
    /// The message is not in flight under the caller's lease.
    UnknownMessage,
    /// The message exhausted its retries and was dead-lettered.
    MaxRetriesExceeded,
    /// Unexpected persistence or data-quality failure.
    Internal,
}

impl ErrorKind {
    /// Returns `true` when the caller is expected to retry later.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::CoordinationUnavailable | Self::CircuitOpen | Self::RouteUnavailable
        )
    }

    /// Returns the stable snake-case name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownAgent => "unknown_agent",
            Self::MessageTooLarge => "message_too_large",
            Self::InvalidPriority => "invalid_priority",
            Self::InvalidInput => "invalid_input",
            Self::CoordinationUnavailable => "coordination_unavailable",
            Self::CircuitOpen => "circuit_open",
            Self::RouteUnavailable => "route_unavailable",
            Self::LeaseExpired => "lease_expired",
            Self::UnknownMessage => "unknown_message",
            Self::MaxRetriesExceeded => "max_retries_exceeded",
            Self::Internal => "internal",
        }
    }

    /// Classifies a store fault that escaped the retry loop.
    pub(crate) fn of_store_fault(fault: &impl StoreFault) -> Self {
        if fault.is_transient() {
            Self::CoordinationUnavailable
        } else {
            Self::Internal
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
