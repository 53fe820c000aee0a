//! Error types for breaker domain validation and parsing.

use thiserror::Error;

/// Errors returned while validating breaker policies.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BreakerDomainError {
    /// A threshold or probe limit is zero.
    #[error("{field} must be at least 1")]
    ZeroLimit {
        /// Name of the offending field.
        field: &'static str,
    },

    /// The maximum cooldown is shorter than the base cooldown.
    #[error("max cooldown {max_seconds}s is shorter than cooldown {cooldown_seconds}s")]
    CooldownCeilingTooLow {
        /// Base cooldown in seconds.
        cooldown_seconds: u32,
        /// Maximum cooldown in seconds.
        max_seconds: u32,
    },
}

/// Error returned while parsing a circuit phase from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown circuit phase: {0}")]
pub struct ParseCircuitPhaseError(pub String);
