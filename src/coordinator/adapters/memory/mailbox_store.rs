//! In-memory mailbox store.
//!
//! A single write lock around all namespaces stands in for the store's
//! transactions: every port call observes and mutates a consistent snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::coordinator::{
    domain::{
        DeadLetterEntry, LEASE_EXPIRED_REASON, LeaseToken, Message, MessageId, MessageStatus,
        RetryBackoff, RetryDecision,
    },
    ports::{
        FailedDelivery, LeaseRequest, MailboxDepth, MailboxError, MailboxRepository,
        MailboxResult,
    },
};
use crate::registry::domain::AgentId;
use crate::store::KeyNamespace;

#[derive(Debug, Default)]
struct MailboxState {
    next_seq: u64,
    namespaces: HashMap<KeyNamespace, NamespaceMailboxes>,
}

#[derive(Debug, Default)]
struct NamespaceMailboxes {
    messages: HashMap<MessageId, Message>,
    dead_letters: Vec<DeadLetterEntry>,
}

impl MailboxState {
    fn allocate_seq(&mut self) -> u64 {
        self.next_seq = self.next_seq.saturating_add(1);
        self.next_seq
    }
}

/// Thread-safe in-memory mailbox repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMailboxStore {
    namespace: KeyNamespace,
    state: Arc<RwLock<MailboxState>>,
}

impl InMemoryMailboxStore {
    /// Creates an empty store in the default namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle onto the same backing state scoped to `namespace`.
    #[must_use]
    pub fn for_namespace(&self, namespace: KeyNamespace) -> Self {
        Self {
            namespace,
            state: Arc::clone(&self.state),
        }
    }

    fn read(&self) -> MailboxResult<RwLockReadGuard<'_, MailboxState>> {
        self.state
            .read()
            .map_err(|err| MailboxError::persistence(std::io::Error::other(err.to_string())))
    }

    fn write(&self) -> MailboxResult<RwLockWriteGuard<'_, MailboxState>> {
        self.state
            .write()
            .map_err(|err| MailboxError::persistence(std::io::Error::other(err.to_string())))
    }

    fn with_leased<T>(
        &self,
        id: MessageId,
        token: LeaseToken,
        now: DateTime<Utc>,
        apply: impl FnOnce(&mut MailboxState, Message) -> T,
    ) -> MailboxResult<T> {
        let mut state = self.write()?;
        let message = state
            .namespaces
            .get(&self.namespace)
            .and_then(|mailboxes| mailboxes.messages.get(&id))
            .cloned()
            .ok_or(MailboxError::UnknownMessage(id))?;
        message
            .check_lease(token, now)
            .map_err(|violation| MailboxError::from_violation(id, violation))?;
        Ok(apply(&mut *state, message))
    }

    fn store(&self, state: &mut MailboxState, message: Message) {
        state
            .namespaces
            .entry(self.namespace.clone())
            .or_default()
            .messages
            .insert(message.id(), message);
    }

    fn fail_message(
        &self,
        state: &mut MailboxState,
        mut message: Message,
        reason: &str,
        now: DateTime<Utc>,
        backoff: &RetryBackoff,
    ) -> FailedDelivery {
        let decision = message.fail(reason, now, backoff);
        match decision {
            RetryDecision::Requeued { .. } => {
                let seq = state.allocate_seq();
                message.assign_enqueue_seq(seq);
            }
            RetryDecision::DeadLettered { .. } => {
                state
                    .namespaces
                    .entry(self.namespace.clone())
                    .or_default()
                    .dead_letters
                    .push(DeadLetterEntry::new(message.clone(), reason, now));
            }
        }
        self.store(state, message.clone());
        FailedDelivery { message, decision }
    }
}

#[async_trait]
impl MailboxRepository for InMemoryMailboxStore {
    async fn enqueue(&self, message: &Message) -> MailboxResult<Message> {
        let mut state = self.write()?;
        let existing = state
            .namespaces
            .get(&self.namespace)
            .and_then(|mailboxes| mailboxes.messages.get(&message.id()))
            .cloned();
        if let Some(stored) = existing {
            return Ok(stored);
        }
        let mut stored = message.clone();
        let seq = state.allocate_seq();
        stored.assign_enqueue_seq(seq);
        self.store(&mut state, stored.clone());
        Ok(stored)
    }

    async fn lease_batch(&self, request: &LeaseRequest) -> MailboxResult<Vec<Message>> {
        let mut state = self.write()?;
        let Some(mailboxes) = state.namespaces.get_mut(&self.namespace) else {
            return Ok(Vec::new());
        };

        let mut candidates: Vec<&mut Message> = mailboxes
            .messages
            .values_mut()
            .filter(|message| {
                message.recipient() == &request.recipient
                    && message.is_leasable(request.now)
                    && !request.excluded_senders.contains(message.sender())
                    && request
                        .only_sender
                        .as_ref()
                        .is_none_or(|only| message.sender() == only)
            })
            .collect();
        candidates.sort_by_key(|message| (Reverse(message.priority()), message.enqueue_seq()));

        Ok(candidates
            .into_iter()
            .take(request.limit)
            .map(|message| {
                message.lease_to(request.lease, request.now);
                message.clone()
            })
            .collect())
    }

    async fn acknowledge(
        &self,
        id: MessageId,
        token: LeaseToken,
        now: DateTime<Utc>,
    ) -> MailboxResult<Message> {
        self.with_leased(id, token, now, |state, mut message| {
            message.acknowledge(now);
            self.store(state, message.clone());
            message
        })
    }

    async fn release(
        &self,
        id: MessageId,
        token: LeaseToken,
        reason: &str,
        now: DateTime<Utc>,
        backoff: &RetryBackoff,
    ) -> MailboxResult<FailedDelivery> {
        self.with_leased(id, token, now, |state, message| {
            self.fail_message(state, message, reason, now, backoff)
        })
    }

    async fn extend_lease(
        &self,
        id: MessageId,
        token: LeaseToken,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> MailboxResult<Message> {
        self.with_leased(id, token, now, |state, mut message| {
            message.extend_lease(expires_at, now);
            self.store(state, message.clone());
            message
        })
    }

    async fn release_expired(
        &self,
        now: DateTime<Utc>,
        backoff: &RetryBackoff,
        limit: usize,
    ) -> MailboxResult<Vec<FailedDelivery>> {
        let mut state = self.write()?;
        let mut lapsed: Vec<Message> = state
            .namespaces
            .get(&self.namespace)
            .map(|mailboxes| {
                mailboxes
                    .messages
                    .values()
                    .filter(|message| message.lease_lapsed(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        lapsed.sort_by_key(|message| message.lease().map(|lease| lease.expires_at()));

        Ok(lapsed
            .into_iter()
            .take(limit)
            .map(|message| {
                self.fail_message(&mut state, message, LEASE_EXPIRED_REASON, now, backoff)
            })
            .collect())
    }

    async fn find(&self, id: MessageId) -> MailboxResult<Option<Message>> {
        let state = self.read()?;
        Ok(state
            .namespaces
            .get(&self.namespace)
            .and_then(|mailboxes| mailboxes.messages.get(&id))
            .cloned())
    }

    async fn pending_senders(
        &self,
        recipient: &AgentId,
        now: DateTime<Utc>,
    ) -> MailboxResult<Vec<AgentId>> {
        let state = self.read()?;
        let senders: BTreeSet<AgentId> = state
            .namespaces
            .get(&self.namespace)
            .map(|mailboxes| {
                mailboxes
                    .messages
                    .values()
                    .filter(|message| message.recipient() == recipient && message.is_leasable(now))
                    .map(|message| message.sender().clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(senders.into_iter().collect())
    }

    async fn depth(&self, recipient: &AgentId) -> MailboxResult<MailboxDepth> {
        let state = self.read()?;
        let mut depth = MailboxDepth::default();
        let Some(mailboxes) = state.namespaces.get(&self.namespace) else {
            return Ok(depth);
        };
        for message in mailboxes
            .messages
            .values()
            .filter(|message| message.recipient() == recipient)
        {
            match message.status() {
                MessageStatus::Pending | MessageStatus::Retrying => {
                    depth.queued = depth.queued.saturating_add(1);
                }
                MessageStatus::InFlight => {
                    depth.in_flight = depth.in_flight.saturating_add(1);
                }
                MessageStatus::Delivered | MessageStatus::DeadLettered => {}
            }
        }
        Ok(depth)
    }

    async fn dead_letters(
        &self,
        recipient: Option<AgentId>,
        limit: usize,
    ) -> MailboxResult<Vec<DeadLetterEntry>> {
        let state = self.read()?;
        Ok(state
            .namespaces
            .get(&self.namespace)
            .map(|mailboxes| {
                mailboxes
                    .dead_letters
                    .iter()
                    .filter(|entry| {
                        recipient
                            .as_ref()
                            .is_none_or(|wanted| entry.message().recipient() == wanted)
                    })
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn purge_settled(&self, cutoff: DateTime<Utc>, limit: usize) -> MailboxResult<usize> {
        let mut state = self.write()?;
        let Some(mailboxes) = state.namespaces.get_mut(&self.namespace) else {
            return Ok(0);
        };
        let mut settled: Vec<(DateTime<Utc>, MessageId)> = mailboxes
            .messages
            .values()
            .filter(|message| message.status().is_terminal() && message.updated_at() < cutoff)
            .map(|message| (message.updated_at(), message.id()))
            .collect();
        settled.sort_unstable();
        settled.truncate(limit);
        for (_, id) in &settled {
            mailboxes.messages.remove(id);
        }
        Ok(settled.len())
    }

    async fn purge_dead_letters(&self, cutoff: DateTime<Utc>) -> MailboxResult<usize> {
        let mut state = self.write()?;
        let Some(mailboxes) = state.namespaces.get_mut(&self.namespace) else {
            return Ok(0);
        };
        let before = mailboxes.dead_letters.len();
        mailboxes
            .dead_letters
            .retain(|entry| entry.moved_at() >= cutoff);
        Ok(before.saturating_sub(mailboxes.dead_letters.len()))
    }
}
