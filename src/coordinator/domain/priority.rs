//! Message priority.

use super::CoordinatorDomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed, totally ordered priority levels.
///
/// ```
/// use switchyard::coordinator::domain::Priority;
///
/// assert!(Priority::Critical > Priority::High);
/// assert!(Priority::Normal > Priority::Low);
/// assert!("urgent".parse::<Priority>().is_err());
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background traffic.
    Low,
    /// Default level.
    #[default]
    Normal,
    /// Preferred over normal traffic.
    High,
    /// Always served first.
    Critical,
}

impl Priority {
    /// All levels, lowest first.
    pub const ALL: [Self; 4] = [Self::Low, Self::Normal, Self::High, Self::Critical];

    /// Returns the storage rank; higher ranks are served first.
    #[must_use]
    pub const fn rank(self) -> i16 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    /// Returns the canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i16> for Priority {
    type Error = CoordinatorDomainError;

    fn try_from(rank: i16) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|level| level.rank() == rank)
            .ok_or_else(|| CoordinatorDomainError::InvalidPriority(rank.to_string()))
    }
}

impl TryFrom<&str> for Priority {
    type Error = CoordinatorDomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| CoordinatorDomainError::InvalidPriority(value.to_owned()))
    }
}

impl FromStr for Priority {
    type Err = CoordinatorDomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::try_from(value)
    }
}
