//! Dead-letter records.

use super::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable record of a message that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    message: Message,
    failure_reason: String,
    moved_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    /// Captures `message` as it was when dead-lettered.
    #[must_use]
    pub fn new(message: Message, failure_reason: impl Into<String>, moved_at: DateTime<Utc>) -> Self {
        Self {
            message,
            failure_reason: failure_reason.into(),
            moved_at,
        }
    }

    /// Returns the message snapshot.
    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    /// Returns the reason given by the final failure.
    #[must_use]
    pub fn failure_reason(&self) -> &str {
        &self.failure_reason
    }

    /// Returns when the message was dead-lettered.
    #[must_use]
    pub const fn moved_at(&self) -> DateTime<Utc> {
        self.moved_at
    }
}
