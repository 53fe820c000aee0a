//! Error types for registry domain validation and parsing.

use thiserror::Error;

/// Errors returned while constructing registry domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryDomainError {
    /// An agent identifier part is empty after trimming.
    #[error("agent {part} must not be empty")]
    EmptyAgentIdPart {
        /// Which part was empty (`type` or `instance`).
        part: &'static str,
    },

    /// An agent identifier part exceeds the storage limit.
    #[error("agent {part} exceeds 128 character limit: {value}")]
    AgentIdPartTooLong {
        /// Which part was too long.
        part: &'static str,
        /// The rejected value.
        value: String,
    },

    /// An agent identifier part contains characters outside `[A-Za-z0-9_.:-]`.
    #[error("agent {part} '{value}' contains invalid characters")]
    InvalidAgentIdPart {
        /// Which part was invalid.
        part: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A textual agent identifier is not of the form `type/instance`.
    #[error("agent identifier '{0}' must have the form 'type/instance'")]
    MalformedAgentId(String),

    /// The liveness TTL is zero.
    #[error("liveness TTL must be at least one second")]
    ZeroTtl,
}

/// Error returned while parsing registration status from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown registration status: {0}")]
pub struct ParseRegistrationStatusError(pub String);
