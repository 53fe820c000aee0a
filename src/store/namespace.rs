//! Deployment key namespace.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum length for a namespace, matching the `VARCHAR(64)` columns.
const MAX_NAMESPACE_LENGTH: usize = 64;

/// Namespace used when the configuration does not name one.
pub const DEFAULT_NAMESPACE: &str = "switchyard";

/// Errors returned while validating a namespace.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NamespaceError {
    /// The namespace is empty after trimming.
    #[error("key namespace must not be empty")]
    Empty,

    /// The namespace exceeds the storage limit.
    #[error("key namespace exceeds {MAX_NAMESPACE_LENGTH} character limit: {0}")]
    TooLong(String),

    /// The namespace contains characters outside `[a-z0-9_-]`.
    #[error("key namespace '{0}' contains invalid characters")]
    InvalidCharacters(String),
}

/// Prefix isolating one deployment's records from another's in a shared store.
///
/// Namespaces are lowercase; the input is trimmed and lowercased before
/// validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyNamespace(String);

impl KeyNamespace {
    /// Creates a validated namespace.
    ///
    /// # Errors
    ///
    /// Returns [`NamespaceError`] when the value is empty, too long, or
    /// contains characters outside `[a-z0-9_-]`.
    pub fn new(value: impl Into<String>) -> Result<Self, NamespaceError> {
        let raw = value.into();
        let normalized = raw.trim().to_ascii_lowercase();

        if normalized.is_empty() {
            return Err(NamespaceError::Empty);
        }
        if normalized.len() > MAX_NAMESPACE_LENGTH {
            return Err(NamespaceError::TooLong(raw));
        }
        let is_valid = normalized
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        if !is_valid {
            return Err(NamespaceError::InvalidCharacters(raw));
        }

        Ok(Self(normalized))
    }

    /// Returns the namespace as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for KeyNamespace {
    fn default() -> Self {
        Self(DEFAULT_NAMESPACE.to_owned())
    }
}

impl TryFrom<String> for KeyNamespace {
    type Error = NamespaceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<KeyNamespace> for String {
    fn from(value: KeyNamespace) -> Self {
        value.0
    }
}

impl AsRef<str> for KeyNamespace {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for KeyNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
