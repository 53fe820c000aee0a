//! Repository port for mailboxes, messages, and dead letters.

use crate::coordinator::domain::{
    DeadLetterEntry, Lease, LeaseToken, LeaseViolation, Message, MessageId, RetryBackoff,
    RetryDecision,
};
use crate::registry::domain::AgentId;
use crate::store::StoreFault;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for mailbox repository operations.
pub type MailboxResult<T> = Result<T, MailboxError>;

/// Parameters of one atomic pop-and-lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRequest {
    /// Mailbox owner.
    pub recipient: AgentId,
    /// Maximum messages to lease.
    pub limit: usize,
    /// Lease applied to every leased message.
    pub lease: Lease,
    /// Messages from these senders are skipped and stay queued.
    pub excluded_senders: Vec<AgentId>,
    /// When set, only messages from this sender are leased.
    pub only_sender: Option<AgentId>,
    /// Observation instant for backoff checks.
    pub now: DateTime<Utc>,
}

/// A message after a failed attempt, with the decision taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelivery {
    /// The message as stored after the transition.
    pub message: Message,
    /// Whether it was requeued or dead-lettered.
    pub decision: RetryDecision,
}

/// Message counts for one mailbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxDepth {
    /// Messages waiting to be leased, including those in backoff.
    pub queued: usize,
    /// Messages currently leased.
    pub in_flight: usize,
}

/// Persistence contract for message delivery.
///
/// Each method is one atomic transaction against the shared store; in
/// particular [`Self::lease_batch`] never hands the same message to two
/// concurrent callers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailboxRepository: Send + Sync {
    /// Stores a new pending message at the back of its priority band and
    /// returns it with its assigned sequence.
    async fn enqueue(&self, message: &Message) -> MailboxResult<Message>;

    /// Leases up to `request.limit` leasable messages from the recipient's
    /// mailbox, highest priority first and FIFO within a priority.
    async fn lease_batch(&self, request: &LeaseRequest) -> MailboxResult<Vec<Message>>;

    /// Marks a leased message delivered.
    async fn acknowledge(
        &self,
        id: MessageId,
        token: LeaseToken,
        now: DateTime<Utc>,
    ) -> MailboxResult<Message>;

    /// Records a failed attempt on a leased message, requeueing it or moving
    /// it to the dead-letter collection.
    async fn release(
        &self,
        id: MessageId,
        token: LeaseToken,
        reason: &str,
        now: DateTime<Utc>,
        backoff: &RetryBackoff,
    ) -> MailboxResult<FailedDelivery>;

    /// Moves the lease deadline of a leased message.
    async fn extend_lease(
        &self,
        id: MessageId,
        token: LeaseToken,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> MailboxResult<Message>;

    /// Applies the failed-attempt transition to up to `limit` messages whose
    /// lease lapsed before `now`.
    async fn release_expired(
        &self,
        now: DateTime<Utc>,
        backoff: &RetryBackoff,
        limit: usize,
    ) -> MailboxResult<Vec<FailedDelivery>>;

    /// Finds a message by identifier.
    async fn find(&self, id: MessageId) -> MailboxResult<Option<Message>>;

    /// Returns the distinct senders with leasable messages for `recipient`.
    async fn pending_senders(
        &self,
        recipient: &AgentId,
        now: DateTime<Utc>,
    ) -> MailboxResult<Vec<AgentId>>;

    /// Counts the messages in a mailbox.
    async fn depth(&self, recipient: &AgentId) -> MailboxResult<MailboxDepth>;

    /// Lists dead letters, oldest first, optionally for one recipient.
    async fn dead_letters(
        &self,
        recipient: Option<AgentId>,
        limit: usize,
    ) -> MailboxResult<Vec<DeadLetterEntry>>;

    /// Deletes up to `limit` delivered or dead-lettered message records last
    /// updated before `cutoff`, returning how many. Dead-letter entries are
    /// kept.
    async fn purge_settled(&self, cutoff: DateTime<Utc>, limit: usize) -> MailboxResult<usize>;

    /// Deletes dead letters moved before `cutoff`, returning how many.
    async fn purge_dead_letters(&self, cutoff: DateTime<Utc>) -> MailboxResult<usize>;
}

/// Errors returned by mailbox repository implementations.
#[derive(Debug, Clone, Error)]
pub enum MailboxError {
    /// The message is not in flight under the presented lease token.
    #[error("message {0} is not in flight under this lease")]
    UnknownMessage(MessageId),

    /// The presented lease lapsed.
    #[error("lease on message {0} expired")]
    LeaseExpired(MessageId),

    /// The message was already dead-lettered.
    #[error("message {0} exhausted its retries")]
    DeadLettered(MessageId),

    /// Persisted data could not be reconstructed into domain types.
    #[error("invalid persisted message data: {0}")]
    InvalidPersistedData(Arc<dyn std::error::Error + Send + Sync>),

    /// The store could not be reached.
    #[error("mailbox store unavailable: {0}")]
    Unavailable(Arc<dyn std::error::Error + Send + Sync>),

    /// A single store call exceeded its timeout.
    #[error("mailbox store call timed out after {0:?}")]
    TimedOut(Duration),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl MailboxError {
    /// Wraps a data-quality or deserialization error from persisted rows.
    pub fn invalid_persisted_data(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::InvalidPersistedData(Arc::new(err))
    }

    /// Wraps a connectivity failure.
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Unavailable(Arc::new(err))
    }

    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }

    /// Maps a refused lease check on message `id` to its error.
    #[must_use]
    pub const fn from_violation(id: MessageId, violation: LeaseViolation) -> Self {
        match violation {
            LeaseViolation::UnknownMessage => Self::UnknownMessage(id),
            LeaseViolation::LeaseExpired => Self::LeaseExpired(id),
            LeaseViolation::MaxRetriesExceeded => Self::DeadLettered(id),
        }
    }
}

impl StoreFault for MailboxError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::TimedOut(_))
    }

    fn timed_out(after: Duration) -> Self {
        Self::TimedOut(after)
    }
}
