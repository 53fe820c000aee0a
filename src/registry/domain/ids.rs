//! Agent identity.

use super::RegistryDomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length for each identifier part, matching the `VARCHAR(128)`
/// columns.
const MAX_PART_LENGTH: usize = 128;

/// Composite identity of a participant process.
///
/// Two identifiers are equal iff both the agent type and the instance match.
/// The textual form is `type/instance`; neither part may contain `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "AgentIdParts", into = "AgentIdParts")]
pub struct AgentId {
    agent_type: String,
    instance: String,
}

#[derive(Serialize, Deserialize)]
struct AgentIdParts {
    #[serde(rename = "type")]
    agent_type: String,
    instance: String,
}

impl AgentId {
    /// Creates a validated agent identifier.
    ///
    /// Both parts are trimmed. Only characters in `[A-Za-z0-9_.:-]` are
    /// accepted.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryDomainError`] when either part is empty, longer than
    /// 128 characters, or contains disallowed characters.
    pub fn new(
        agent_type: impl Into<String>,
        instance: impl Into<String>,
    ) -> Result<Self, RegistryDomainError> {
        Ok(Self {
            agent_type: validate_part("type", agent_type.into())?,
            instance: validate_part("instance", instance.into())?,
        })
    }

    /// Returns the agent type.
    #[must_use]
    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    /// Returns the agent instance.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }
}

/// Validates that a type filter is itself a well-formed identifier part.
pub(crate) fn validate_type_filter(value: &str) -> Result<String, RegistryDomainError> {
    validate_part("type", value.to_owned())
}

fn validate_part(part: &'static str, raw: String) -> Result<String, RegistryDomainError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RegistryDomainError::EmptyAgentIdPart { part });
    }
    if trimmed.len() > MAX_PART_LENGTH {
        return Err(RegistryDomainError::AgentIdPartTooLong { part, value: raw });
    }
    let is_valid = trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'));
    if !is_valid {
        return Err(RegistryDomainError::InvalidAgentIdPart { part, value: raw });
    }
    Ok(trimmed.to_owned())
}

impl TryFrom<AgentIdParts> for AgentId {
    type Error = RegistryDomainError;

    fn try_from(parts: AgentIdParts) -> Result<Self, Self::Error> {
        Self::new(parts.agent_type, parts.instance)
    }
}

impl From<AgentId> for AgentIdParts {
    fn from(id: AgentId) -> Self {
        Self {
            agent_type: id.agent_type,
            instance: id.instance,
        }
    }
}

impl FromStr for AgentId {
    type Err = RegistryDomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (agent_type, instance) = value
            .split_once('/')
            .ok_or_else(|| RegistryDomainError::MalformedAgentId(value.to_owned()))?;
        Self::new(agent_type, instance)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent_type, self.instance)
    }
}
