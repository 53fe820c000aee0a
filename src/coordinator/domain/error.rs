//! Error types for coordinator domain validation and lease checks.

use thiserror::Error;

/// Errors returned while constructing coordinator domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinatorDomainError {
    /// A priority outside `low`, `normal`, `high`, `critical` (or 0..=3).
    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    /// A message identifier or lease token is not a UUID.
    #[error("invalid identifier '{value}': {reason}")]
    InvalidIdentifier {
        /// The rejected text.
        value: String,
        /// Parser message.
        reason: String,
    },
}

/// Why a lease-bearing call was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LeaseViolation {
    /// The message is not in flight under the presented token.
    #[error("message is not in flight under this lease")]
    UnknownMessage,
    /// The token matches but the lease lapsed.
    #[error("lease expired")]
    LeaseExpired,
    /// The message was already dead-lettered.
    #[error("message exhausted its retries")]
    MaxRetriesExceeded,
}

/// Error returned while parsing a message status from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown message status: {0}")]
pub struct ParseMessageStatusError(pub String);
