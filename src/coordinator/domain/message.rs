//! Message aggregate and its delivery transitions.

use super::{LeaseToken, LeaseViolation, MessageId, MessageStatus, Priority, RetryBackoff};
use crate::registry::domain::AgentId;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};

/// Failure reason recorded when a lease lapses without acknowledgement.
pub const LEASE_EXPIRED_REASON: &str = "lease expired";

/// Exclusive, time-bounded claim on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lease {
    token: LeaseToken,
    expires_at: DateTime<Utc>,
}

impl Lease {
    /// Creates a lease.
    #[must_use]
    pub const fn new(token: LeaseToken, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    /// Returns the lease token.
    #[must_use]
    pub const fn token(&self) -> LeaseToken {
        self.token
    }

    /// Returns the instant the lease lapses.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns `true` when the lease has lapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Validated input for a new message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Sending agent.
    pub sender: AgentId,
    /// Receiving agent.
    pub recipient: AgentId,
    /// Opaque payload.
    pub payload: Vec<u8>,
    /// Delivery priority.
    pub priority: Priority,
    /// Redeliveries allowed before dead-lettering.
    pub max_retries: u32,
}

/// What happened to a message after a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetryDecision {
    /// Queued again; leasable from `available_at`.
    Requeued {
        /// Failed attempts so far.
        attempt_count: u32,
        /// Earliest instant the message may be leased again.
        available_at: DateTime<Utc>,
    },
    /// Retries exhausted; moved to the dead-letter collection.
    DeadLettered {
        /// Failed attempts in total.
        attempt_count: u32,
    },
}

/// A message between two agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    sender: AgentId,
    recipient: AgentId,
    payload: Vec<u8>,
    priority: Priority,
    status: MessageStatus,
    attempt_count: u32,
    max_retries: u32,
    enqueue_seq: u64,
    lease: Option<Lease>,
    #[serde(default)]
    settled_by: Option<LeaseToken>,
    available_at: DateTime<Utc>,
    last_failure: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedMessageData {
    /// Persisted identifier.
    pub id: MessageId,
    /// Persisted sender.
    pub sender: AgentId,
    /// Persisted recipient.
    pub recipient: AgentId,
    /// Persisted payload.
    pub payload: Vec<u8>,
    /// Persisted priority.
    pub priority: Priority,
    /// Persisted status.
    pub status: MessageStatus,
    /// Persisted failed-attempt count.
    pub attempt_count: u32,
    /// Persisted retry allowance.
    pub max_retries: u32,
    /// Persisted enqueue sequence.
    pub enqueue_seq: u64,
    /// Persisted lease, if in flight.
    pub lease: Option<Lease>,
    /// Persisted token of the lease that ended the latest attempt.
    pub settled_by: Option<LeaseToken>,
    /// Persisted earliest lease instant.
    pub available_at: DateTime<Utc>,
    /// Persisted reason of the latest failure.
    pub last_failure: Option<String>,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Creates a pending message, leasable immediately.
    ///
    /// The enqueue sequence is assigned by the mailbox when the message is
    /// stored.
    #[must_use]
    pub fn new(draft: NewMessage, clock: &impl Clock) -> Self {
        let now = clock.utc();
        Self {
            id: MessageId::new(),
            sender: draft.sender,
            recipient: draft.recipient,
            payload: draft.payload,
            priority: draft.priority,
            status: MessageStatus::Pending,
            attempt_count: 0,
            max_retries: draft.max_retries,
            enqueue_seq: 0,
            lease: None,
            settled_by: None,
            available_at: now,
            last_failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reconstructs a message from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedMessageData) -> Self {
        Self {
            id: data.id,
            sender: data.sender,
            recipient: data.recipient,
            payload: data.payload,
            priority: data.priority,
            status: data.status,
            attempt_count: data.attempt_count,
            max_retries: data.max_retries,
            enqueue_seq: data.enqueue_seq,
            lease: data.lease,
            settled_by: data.settled_by,
            available_at: data.available_at,
            last_failure: data.last_failure,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    /// Returns the message identifier.
    #[must_use]
    pub const fn id(&self) -> MessageId {
        self.id
    }

    /// Returns the sender.
    #[must_use]
    pub const fn sender(&self) -> &AgentId {
        &self.sender
    }

    /// Returns the recipient.
    #[must_use]
    pub const fn recipient(&self) -> &AgentId {
        &self.recipient
    }

    /// Returns the opaque payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the status.
    #[must_use]
    pub const fn status(&self) -> MessageStatus {
        self.status
    }

    /// Returns the number of failed delivery attempts.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Returns the redeliveries allowed before dead-lettering.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the position within its priority band; lower is older.
    #[must_use]
    pub const fn enqueue_seq(&self) -> u64 {
        self.enqueue_seq
    }

    /// Returns the active lease, if in flight.
    #[must_use]
    pub const fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    /// Returns the token of the lease whose ack or failure ended the latest
    /// attempt.
    #[must_use]
    pub const fn settled_by(&self) -> Option<LeaseToken> {
        self.settled_by
    }

    /// Returns `true` when `token`'s holder acknowledged this message.
    #[must_use]
    pub fn delivered_under(&self, token: LeaseToken) -> bool {
        self.status == MessageStatus::Delivered && self.settled_by == Some(token)
    }

    /// Rebuilds the decision taken when `token`'s holder reported a failed
    /// attempt, or `None` when that lease did not end in a failure.
    #[must_use]
    pub fn failed_under(&self, token: LeaseToken) -> Option<RetryDecision> {
        if self.settled_by != Some(token) {
            return None;
        }
        match self.status {
            MessageStatus::DeadLettered => Some(RetryDecision::DeadLettered {
                attempt_count: self.attempt_count,
            }),
            MessageStatus::Delivered => None,
            MessageStatus::Pending | MessageStatus::Retrying | MessageStatus::InFlight => {
                Some(RetryDecision::Requeued {
                    attempt_count: self.attempt_count,
                    available_at: self.available_at,
                })
            }
        }
    }

    /// Returns the earliest instant the message may be leased.
    #[must_use]
    pub const fn available_at(&self) -> DateTime<Utc> {
        self.available_at
    }

    /// Returns the reason given by the latest failure.
    #[must_use]
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the last update timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns `true` when the message waits in its mailbox and its backoff
    /// has elapsed at `now`.
    #[must_use]
    pub fn is_leasable(&self, now: DateTime<Utc>) -> bool {
        self.status.is_queued() && self.available_at <= now
    }

    /// Returns `true` when the message is in flight and its lease has lapsed
    /// at `now`.
    #[must_use]
    pub fn lease_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == MessageStatus::InFlight
            && self.lease.is_some_and(|lease| lease.is_expired(now))
    }

    /// Records the mailbox position assigned by the store.
    pub const fn assign_enqueue_seq(&mut self, seq: u64) {
        self.enqueue_seq = seq;
    }

    /// Leases the message. Callers check [`Self::is_leasable`] first.
    pub fn lease_to(&mut self, lease: Lease, now: DateTime<Utc>) {
        self.status = MessageStatus::InFlight;
        self.lease = Some(lease);
        self.updated_at = now;
    }

    /// Checks that `token` holds a live lease on this message at `now`.
    ///
    /// # Errors
    ///
    /// Returns the [`LeaseViolation`] describing why the token is refused.
    pub fn check_lease(&self, token: LeaseToken, now: DateTime<Utc>) -> Result<(), LeaseViolation> {
        if self.status == MessageStatus::DeadLettered {
            return Err(LeaseViolation::MaxRetriesExceeded);
        }
        let Some(lease) = self.lease.filter(|held| held.token() == token) else {
            return Err(LeaseViolation::UnknownMessage);
        };
        if self.status != MessageStatus::InFlight {
            return Err(LeaseViolation::UnknownMessage);
        }
        if lease.is_expired(now) {
            return Err(LeaseViolation::LeaseExpired);
        }
        Ok(())
    }

    /// Marks the message delivered and drops its lease.
    pub fn acknowledge(&mut self, now: DateTime<Utc>) {
        self.status = MessageStatus::Delivered;
        self.settled_by = self.lease.take().map(|lease| lease.token());
        self.updated_at = now;
    }

    /// Moves the lease deadline to `expires_at`.
    pub fn extend_lease(&mut self, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        if let Some(lease) = self.lease.as_mut() {
            lease.expires_at = expires_at;
        }
        self.updated_at = now;
    }

    /// Records a failed delivery attempt.
    ///
    /// The message is queued again after the backoff for its new attempt
    /// count, or dead-lettered once the count exceeds `max_retries`. A
    /// requeued message goes to the back of its priority band; the store
    /// assigns the fresh sequence.
    pub fn fail(
        &mut self,
        reason: &str,
        now: DateTime<Utc>,
        backoff: &RetryBackoff,
    ) -> RetryDecision {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.settled_by = self.lease.take().map(|lease| lease.token());
        self.last_failure = Some(reason.to_owned());
        self.updated_at = now;

        if self.attempt_count > self.max_retries {
            self.status = MessageStatus::DeadLettered;
            return RetryDecision::DeadLettered {
                attempt_count: self.attempt_count,
            };
        }

        let delay = TimeDelta::from_std(backoff.delay_for(self.attempt_count))
            .unwrap_or(TimeDelta::MAX);
        self.status = MessageStatus::Retrying;
        self.available_at = now
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        RetryDecision::Requeued {
            attempt_count: self.attempt_count,
            available_at: self.available_at,
        }
    }
}
