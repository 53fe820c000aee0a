//! Service layer for message delivery between agents.
//!
//! Provides [`MessageCoordinator`]. Sends are gated only for reporting: the
//! message is always enqueued and the sender learns whether the route can
//! deliver now. Receives are gated for real: a dead receiver or an open
//! circuit leaves messages queued and surfaces
//! [`CoordinatorServiceError::RouteUnavailable`]. A half-open circuit lets
//! through one message per trial slot it hands out.

use crate::coordinator::{
    domain::{
        CoordinatorDomainError, DeadLetterEntry, Lease, LeaseToken, Message, MessageId,
        NewMessage, Priority, RetryBackoff, RetryDecision, RouteBlock, RouteScope, RouteStatus,
    },
    ports::{
        AgentLiveness, FailedDelivery, GateError, LeaseRequest, MailboxDepth, MailboxError,
        MailboxRepository, MailboxResult, RouteGrant, RouteHealth,
    },
};
use crate::breaker::domain::CircuitSubject;
use crate::error::ErrorKind;
use crate::registry::domain::AgentId;
use crate::store::{StoreFault, StoreRetryPolicy, retry_transient, retry_transient_or_resolve};
use crate::sweeper::PeriodicSweep;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default upper bound on payload size.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Default redeliveries allowed before dead-lettering.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default age after which settled messages are deleted.
pub const DEFAULT_SETTLED_RETENTION: Duration = Duration::from_secs(86_400);

/// Tunables for [`MessageCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Largest accepted payload in bytes.
    pub max_payload_bytes: usize,
    /// Retries used when a sender does not choose.
    pub default_max_retries: u32,
    /// Upper bound applied to sender-chosen retries.
    pub max_retries_ceiling: u32,
    /// Largest batch one receive may lease.
    pub max_batch_size: usize,
    /// Lease used by callers that do not choose one.
    pub default_lease: Duration,
    /// Redelivery pacing.
    pub backoff: RetryBackoff,
    /// Circuit granularity for delivery gating and feedback.
    pub route_scope: RouteScope,
    /// Age after which dead letters may be purged; `None` keeps them.
    pub dead_letter_retention: Option<Duration>,
    /// Age after which delivered and dead-lettered messages are deleted;
    /// `None` keeps them.
    pub settled_retention: Option<Duration>,
    /// Maximum lapsed leases or settled messages handled by one sweep.
    pub sweep_batch_size: usize,
    /// Maximum dead letters returned by one listing.
    pub dead_letter_page_size: usize,
    /// Transient-fault retry policy for store calls.
    pub retry: StoreRetryPolicy,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            default_max_retries: DEFAULT_MAX_RETRIES,
            max_retries_ceiling: 16,
            max_batch_size: 100,
            default_lease: Duration::from_secs(30),
            backoff: RetryBackoff::default(),
            route_scope: RouteScope::default(),
            dead_letter_retention: None,
            settled_retention: Some(DEFAULT_SETTLED_RETENTION),
            sweep_batch_size: 500,
            dead_letter_page_size: 1000,
            retry: StoreRetryPolicy::default(),
        }
    }
}

/// Outcome of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    /// Identifier of the enqueued message.
    pub message_id: MessageId,
    /// Whether the recipient can receive it now.
    pub route: RouteStatus,
}

/// Outcome of one lease-expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Lapsed messages queued again.
    pub requeued: usize,
    /// Lapsed messages that exhausted their retries.
    pub dead_lettered: usize,
}

impl SweepReport {
    /// Returns the number of messages the sweep touched.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.requeued.saturating_add(self.dead_lettered)
    }
}

/// Service-level errors for delivery operations.
#[derive(Debug, Error)]
pub enum CoordinatorServiceError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] CoordinatorDomainError),

    /// The payload exceeds the configured bound.
    #[error("payload of {size} bytes exceeds the {limit}-byte limit")]
    MessageTooLarge {
        /// Payload size.
        size: usize,
        /// Configured bound.
        limit: usize,
    },

    /// The receiver cannot be served now; its messages stay queued.
    #[error("route to {agent} unavailable: {reason}")]
    RouteUnavailable {
        /// The receiving agent.
        agent: AgentId,
        /// What blocks delivery.
        reason: RouteBlock,
    },

    /// The message is not in flight under the presented lease.
    #[error("message {0} is not in flight under this lease")]
    UnknownMessage(MessageId),

    /// The presented lease lapsed.
    #[error("lease on message {0} expired")]
    LeaseExpired(MessageId),

    /// The message exhausted its retries and was dead-lettered.
    #[error("message {0} exceeded its retries and was dead-lettered")]
    MaxRetriesExceeded(MessageId),

    /// A lease duration of zero, or one too large to represent.
    #[error("invalid lease duration: {0:?}")]
    InvalidLeaseDuration(Duration),

    /// The liveness or route gate could not be consulted.
    #[error(transparent)]
    Gate(#[from] GateError),

    /// The store stayed unreachable after the retry ceiling.
    #[error("coordination store unavailable: {0}")]
    CoordinationUnavailable(#[source] MailboxError),

    /// Repository operation failed permanently.
    #[error(transparent)]
    Repository(MailboxError),
}

impl From<MailboxError> for CoordinatorServiceError {
    fn from(err: MailboxError) -> Self {
        match err {
            MailboxError::UnknownMessage(id) => Self::UnknownMessage(id),
            MailboxError::LeaseExpired(id) => Self::LeaseExpired(id),
            MailboxError::DeadLettered(id) => Self::MaxRetriesExceeded(id),
            other if other.is_transient() => Self::CoordinationUnavailable(other),
            other => Self::Repository(other),
        }
    }
}

impl CoordinatorServiceError {
    /// Returns the stable classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Domain(CoordinatorDomainError::InvalidPriority(_)) => ErrorKind::InvalidPriority,
            Self::Domain(_) | Self::InvalidLeaseDuration(_) => ErrorKind::InvalidInput,
            Self::MessageTooLarge { .. } => ErrorKind::MessageTooLarge,
            Self::RouteUnavailable { .. } => ErrorKind::RouteUnavailable,
            Self::UnknownMessage(_) => ErrorKind::UnknownMessage,
            Self::LeaseExpired(_) => ErrorKind::LeaseExpired,
            Self::MaxRetriesExceeded(_) => ErrorKind::MaxRetriesExceeded,
            Self::Gate(err) => err.kind(),
            Self::CoordinationUnavailable(_) => ErrorKind::CoordinationUnavailable,
            Self::Repository(err) => ErrorKind::of_store_fault(err),
        }
    }
}

/// Result type for coordinator service operations.
pub type CoordinatorServiceResult<T> = Result<T, CoordinatorServiceError>;

/// Priority mailbox coordinator.
#[derive(Clone)]
pub struct MessageCoordinator<M, L, H, C>
where
    M: MailboxRepository,
    L: AgentLiveness,
    H: RouteHealth,
    C: Clock + Send + Sync,
{
    mailbox: Arc<M>,
    liveness: Arc<L>,
    routes: Arc<H>,
    clock: Arc<C>,
    settings: CoordinatorSettings,
}

impl<M, L, H, C> MessageCoordinator<M, L, H, C>
where
    M: MailboxRepository + 'static,
    L: AgentLiveness + 'static,
    H: RouteHealth + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a coordinator with default settings.
    #[must_use]
    pub fn new(mailbox: Arc<M>, liveness: Arc<L>, routes: Arc<H>, clock: Arc<C>) -> Self {
        Self::with_settings(mailbox, liveness, routes, clock, CoordinatorSettings::default())
    }

    /// Creates a coordinator with explicit settings.
    #[must_use]
    pub const fn with_settings(
        mailbox: Arc<M>,
        liveness: Arc<L>,
        routes: Arc<H>,
        clock: Arc<C>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            mailbox,
            liveness,
            routes,
            clock,
            settings,
        }
    }

    /// Returns the settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Enqueues a message at the back of its priority band in the
    /// recipient's mailbox.
    ///
    /// The message is enqueued even when the route is currently unavailable;
    /// the receipt carries the route status so the sender can tell.
    /// `max_retries` defaults to the configured value and is capped at the
    /// configured ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorServiceError::MessageTooLarge`] for oversized
    /// payloads, [`CoordinatorServiceError::Gate`] when route health cannot
    /// be determined, or
    /// [`CoordinatorServiceError::CoordinationUnavailable`] when the store
    /// cannot be reached. Nothing is enqueued on error.
    pub async fn send_message(
        &self,
        sender: AgentId,
        recipient: AgentId,
        payload: Vec<u8>,
        priority: Priority,
        max_retries: Option<u32>,
    ) -> CoordinatorServiceResult<SendReceipt> {
        if payload.len() > self.settings.max_payload_bytes {
            return Err(CoordinatorServiceError::MessageTooLarge {
                size: payload.len(),
                limit: self.settings.max_payload_bytes,
            });
        }

        let route = self.route_status(&sender, &recipient).await?;
        let draft = NewMessage {
            sender,
            recipient,
            payload,
            priority,
            max_retries: max_retries
                .unwrap_or(self.settings.default_max_retries)
                .min(self.settings.max_retries_ceiling),
        };
        let message = Message::new(draft, &*self.clock);
        let stored = retry_transient(&self.settings.retry, "coordinator.enqueue", || {
            self.mailbox.enqueue(&message)
        })
        .await?;

        tracing::info!(
            message_id = %stored.id(),
            sender = %stored.sender(),
            recipient = %stored.recipient(),
            priority = %stored.priority(),
            enqueue_seq = stored.enqueue_seq(),
            "message enqueued"
        );
        if let RouteStatus::Unavailable(reason) = route {
            tracing::warn!(
                message_id = %stored.id(),
                recipient = %stored.recipient(),
                %reason,
                "message queued behind an unavailable route"
            );
        }
        Ok(SendReceipt {
            message_id: stored.id(),
            route,
        })
    }

    /// Leases up to `batch_size` messages from `agent`'s mailbox, highest
    /// priority first and FIFO within a priority.
    ///
    /// All returned messages share one freshly minted lease token. The batch
    /// size is clamped to the configured maximum; zero returns an empty
    /// batch without touching the store. A half-open route contributes at
    /// most as many messages as it has free trial slots, and slots left
    /// unused are handed back.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorServiceError::RouteUnavailable`] when `agent` is
    /// not alive or its circuit is not admitting calls,
    /// [`CoordinatorServiceError::InvalidLeaseDuration`] for a zero lease,
    /// or [`CoordinatorServiceError::CoordinationUnavailable`] when the store
    /// cannot be reached.
    pub async fn receive_messages(
        &self,
        agent: &AgentId,
        batch_size: usize,
        lease_duration: Duration,
    ) -> CoordinatorServiceResult<Vec<Message>> {
        if lease_duration.is_zero() {
            return Err(CoordinatorServiceError::InvalidLeaseDuration(lease_duration));
        }
        let limit = batch_size.min(self.settings.max_batch_size);
        if limit == 0 {
            return Ok(Vec::new());
        }

        if !self.liveness.is_alive(agent).await? {
            return Err(route_unavailable(agent, RouteBlock::RecipientNotAlive));
        }

        let now = self.clock.utc();
        let lease = Lease::new(LeaseToken::new(), deadline(now, lease_duration)?);
        let request = LeaseRequest {
            recipient: agent.clone(),
            limit,
            lease,
            excluded_senders: Vec::new(),
            only_sender: None,
            now,
        };
        let leased = match self.settings.route_scope {
            RouteScope::Recipient => self.lease_for_recipient(request).await?,
            RouteScope::Pair => self.lease_per_route(request).await?,
        };

        if !leased.is_empty() {
            tracing::debug!(
                recipient = %agent,
                count = leased.len(),
                lease_token = %lease.token(),
                expires_at = %lease.expires_at(),
                "messages leased"
            );
        }
        Ok(leased)
    }

    /// Leases a batch using the configured default lease duration.
    ///
    /// # Errors
    ///
    /// See [`Self::receive_messages`].
    pub async fn receive_with_default_lease(
        &self,
        agent: &AgentId,
        batch_size: usize,
    ) -> CoordinatorServiceResult<Vec<Message>> {
        self.receive_messages(agent, batch_size, self.settings.default_lease)
            .await
    }

    /// Marks a leased message delivered and records a success against its
    /// route.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorServiceError::UnknownMessage`] for a wrong token
    /// or a message not in flight,
    /// [`CoordinatorServiceError::LeaseExpired`] when the lease lapsed,
    /// [`CoordinatorServiceError::MaxRetriesExceeded`] when the message was
    /// already dead-lettered, or
    /// [`CoordinatorServiceError::CoordinationUnavailable`] when the store
    /// cannot be reached.
    pub async fn ack_message(
        &self,
        message_id: MessageId,
        lease_token: LeaseToken,
    ) -> CoordinatorServiceResult<Message> {
        let now = self.clock.utc();
        let delivered = retry_transient_or_resolve(
            &self.settings.retry,
            "coordinator.acknowledge",
            || self.mailbox.acknowledge(message_id, lease_token, now),
            |err| async move {
                match self.stored(message_id).await {
                    Ok(Some(message)) if message.delivered_under(lease_token) => Ok(message),
                    _ => Err(err),
                }
            },
        )
        .await?;

        tracing::info!(
            message_id = %message_id,
            recipient = %delivered.recipient(),
            attempts = delivered.attempt_count(),
            "message delivered"
        );
        let subject = self.subject_for(&delivered);
        if let Err(err) = self.routes.record_success(&subject).await {
            tracing::warn!(subject = %subject, error = %err, "failed to record delivery success");
        }
        Ok(delivered)
    }

    /// Records a failed attempt on a leased message and records a failure
    /// against its route.
    ///
    /// The message is queued again after its backoff, or dead-lettered once
    /// its attempts exceed its retries; both are successful outcomes reported
    /// through the returned decision.
    ///
    /// # Errors
    ///
    /// Same as [`Self::ack_message`].
    pub async fn nack_message(
        &self,
        message_id: MessageId,
        lease_token: LeaseToken,
        reason: &str,
    ) -> CoordinatorServiceResult<RetryDecision> {
        let now = self.clock.utc();
        let failed = retry_transient_or_resolve(
            &self.settings.retry,
            "coordinator.release",
            || {
                self.mailbox
                    .release(message_id, lease_token, reason, now, &self.settings.backoff)
            },
            |err| async move {
                let stored = self.stored(message_id).await.ok().flatten();
                stored
                    .and_then(|message| {
                        message
                            .failed_under(lease_token)
                            .map(|decision| FailedDelivery { message, decision })
                    })
                    .ok_or(err)
            },
        )
        .await?;
        self.after_failure(&failed).await;
        Ok(failed.decision)
    }

    /// Moves the lease deadline of a leased message to `extension` from now.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorServiceError::InvalidLeaseDuration`] for a zero
    /// extension; otherwise the same as [`Self::ack_message`].
    pub async fn extend_lease(
        &self,
        message_id: MessageId,
        lease_token: LeaseToken,
        extension: Duration,
    ) -> CoordinatorServiceResult<Lease> {
        if extension.is_zero() {
            return Err(CoordinatorServiceError::InvalidLeaseDuration(extension));
        }
        let now = self.clock.utc();
        let expires_at = deadline(now, extension)?;
        let extended = retry_transient(&self.settings.retry, "coordinator.extend_lease", || {
            self.mailbox
                .extend_lease(message_id, lease_token, expires_at, now)
        })
        .await?;
        tracing::debug!(message_id = %message_id, expires_at = %expires_at, "lease extended");
        extended
            .lease()
            .copied()
            .ok_or(CoordinatorServiceError::UnknownMessage(message_id))
    }

    /// Applies the failed-attempt transition to messages whose lease lapsed
    /// without an acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorServiceError::CoordinationUnavailable`] when the
    /// store cannot be reached.
    pub async fn sweep_expired_leases(&self) -> CoordinatorServiceResult<SweepReport> {
        let now = self.clock.utc();
        let lapsed = retry_transient(&self.settings.retry, "coordinator.release_expired", || {
            self.mailbox
                .release_expired(now, &self.settings.backoff, self.settings.sweep_batch_size)
        })
        .await?;

        let mut report = SweepReport::default();
        for failed in &lapsed {
            match failed.decision {
                RetryDecision::Requeued { .. } => {
                    report.requeued = report.requeued.saturating_add(1);
                }
                RetryDecision::DeadLettered { .. } => {
                    report.dead_lettered = report.dead_lettered.saturating_add(1);
                }
            }
            self.after_failure(failed).await;
        }
        Ok(report)
    }

    /// Returns a message by identifier, in any status.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorServiceError::CoordinationUnavailable`] when the
    /// store cannot be reached.
    pub async fn message(&self, message_id: MessageId) -> CoordinatorServiceResult<Option<Message>> {
        Ok(self.stored(message_id).await?)
    }

    /// Lists dead letters oldest first, optionally for one recipient.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorServiceError::CoordinationUnavailable`] when the
    /// store cannot be reached.
    pub async fn dead_letters(
        &self,
        recipient: Option<&AgentId>,
    ) -> CoordinatorServiceResult<Vec<DeadLetterEntry>> {
        Ok(
            retry_transient(&self.settings.retry, "coordinator.dead_letters", || {
                self.mailbox
                    .dead_letters(recipient.cloned(), self.settings.dead_letter_page_size)
            })
            .await?,
        )
    }

    /// Counts queued and in-flight messages for `agent`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorServiceError::CoordinationUnavailable`] when the
    /// store cannot be reached.
    pub async fn mailbox_depth(&self, agent: &AgentId) -> CoordinatorServiceResult<MailboxDepth> {
        Ok(
            retry_transient(&self.settings.retry, "coordinator.depth", || {
                self.mailbox.depth(agent)
            })
            .await?,
        )
    }

    /// Deletes dead letters older than the configured retention.
    ///
    /// Returns zero without touching the store when no retention is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorServiceError::CoordinationUnavailable`] when the
    /// store cannot be reached.
    pub async fn purge_dead_letters(&self) -> CoordinatorServiceResult<usize> {
        let Some(retention) = self.settings.dead_letter_retention else {
            return Ok(0);
        };
        let cutoff = retention_cutoff(self.clock.utc(), retention);
        let purged = retry_transient(&self.settings.retry, "coordinator.purge_dead_letters", || {
            self.mailbox.purge_dead_letters(cutoff)
        })
        .await?;
        if purged > 0 {
            tracing::info!(purged, cutoff = %cutoff, "dead letters purged");
        }
        Ok(purged)
    }

    /// Deletes delivered and dead-lettered messages last touched before the
    /// configured retention, at most one sweep batch per call.
    ///
    /// Dead-letter entries are kept; they follow their own retention.
    /// Returns zero without touching the store when no retention is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorServiceError::CoordinationUnavailable`] when the
    /// store cannot be reached.
    pub async fn purge_settled_messages(&self) -> CoordinatorServiceResult<usize> {
        let Some(retention) = self.settings.settled_retention else {
            return Ok(0);
        };
        let cutoff = retention_cutoff(self.clock.utc(), retention);
        let purged = retry_transient(&self.settings.retry, "coordinator.purge_settled", || {
            self.mailbox
                .purge_settled(cutoff, self.settings.sweep_batch_size)
        })
        .await?;
        if purged > 0 {
            tracing::info!(purged, cutoff = %cutoff, "settled messages purged");
        }
        Ok(purged)
    }

    async fn stored(&self, message_id: MessageId) -> MailboxResult<Option<Message>> {
        retry_transient(&self.settings.retry, "coordinator.find", || {
            self.mailbox.find(message_id)
        })
        .await
    }

    async fn lease(&self, request: &LeaseRequest) -> MailboxResult<Vec<Message>> {
        retry_transient(&self.settings.retry, "coordinator.lease_batch", || {
            self.mailbox.lease_batch(request)
        })
        .await
    }

    async fn route_status(
        &self,
        sender: &AgentId,
        recipient: &AgentId,
    ) -> CoordinatorServiceResult<RouteStatus> {
        if !self.liveness.is_alive(recipient).await? {
            return Ok(RouteStatus::Unavailable(RouteBlock::RecipientNotAlive));
        }
        let subject = self.settings.route_scope.subject(sender, recipient);
        if !self.routes.is_admitting(&subject).await? {
            return Ok(RouteStatus::Unavailable(RouteBlock::CircuitOpen));
        }
        Ok(RouteStatus::Available)
    }

    async fn lease_for_recipient(
        &self,
        mut request: LeaseRequest,
    ) -> CoordinatorServiceResult<Vec<Message>> {
        let subject = CircuitSubject::agent(request.recipient.clone());
        let Some(allowance) = self.allowance(&subject, request.limit).await? else {
            return Err(route_unavailable(&request.recipient, RouteBlock::CircuitOpen));
        };
        request.limit = allowance.cap(request.limit);
        let leased = self.lease(&request).await;
        self.return_unused(&subject, allowance, leased.as_ref().map_or(0, Vec::len))
            .await;
        leased.map_err(Into::into)
    }

    /// Leases from every sender whose route admits deliveries. Senders on
    /// half-open routes are leased one by one, each capped at its slots.
    async fn lease_per_route(
        &self,
        mut request: LeaseRequest,
    ) -> CoordinatorServiceResult<Vec<Message>> {
        let agent = request.recipient.clone();
        let senders = retry_transient(&self.settings.retry, "coordinator.pending_senders", || {
            self.mailbox.pending_senders(&agent, request.now)
        })
        .await?;

        let mut limited: Vec<(AgentId, CircuitSubject, usize)> = Vec::new();
        let mut blocked = 0_usize;
        for sender in &senders {
            let subject = CircuitSubject::route(sender.clone(), agent.clone());
            match self.allowance(&subject, request.limit).await {
                Ok(Some(Allowance::Unlimited)) => {}
                Ok(Some(Allowance::Slots(slots))) => {
                    limited.push((sender.clone(), subject, slots));
                    request.excluded_senders.push(sender.clone());
                }
                Ok(None) => {
                    blocked = blocked.saturating_add(1);
                    request.excluded_senders.push(sender.clone());
                }
                Err(err) => {
                    self.return_all(&limited).await;
                    return Err(err);
                }
            }
        }
        if !senders.is_empty() && blocked == senders.len() {
            return Err(route_unavailable(&agent, RouteBlock::CircuitOpen));
        }

        let mut batch = match self.lease(&request).await {
            Ok(batch) => batch,
            Err(err) => {
                self.return_all(&limited).await;
                return Err(err.into());
            }
        };
        let limit = request.limit;
        request.excluded_senders.clear();
        for (sender, subject, slots) in limited {
            let room = limit.saturating_sub(batch.len());
            if room == 0 {
                self.return_unused(&subject, Allowance::Slots(slots), 0).await;
                continue;
            }
            request.limit = slots.min(room);
            request.only_sender = Some(sender);
            match self.lease(&request).await {
                Ok(leased) => {
                    self.return_unused(&subject, Allowance::Slots(slots), leased.len())
                        .await;
                    batch.extend(leased);
                }
                Err(err) => {
                    self.return_unused(&subject, Allowance::Slots(slots), 0).await;
                    if batch.is_empty() {
                        return Err(err.into());
                    }
                    tracing::warn!(
                        subject = %subject,
                        error = %err,
                        "half-open route skipped after a lease failure"
                    );
                }
            }
        }
        batch.sort_by_key(|message| (Reverse(message.priority()), message.enqueue_seq()));
        Ok(batch)
    }

    /// Takes delivery slots on `subject` for up to `limit` messages, or
    /// `None` when the circuit rejects deliveries.
    async fn allowance(
        &self,
        subject: &CircuitSubject,
        limit: usize,
    ) -> CoordinatorServiceResult<Option<Allowance>> {
        let mut slots = 0_usize;
        while slots < limit {
            match self.routes.acquire(subject).await {
                Ok(RouteGrant::Trial) => slots = slots.saturating_add(1),
                Ok(RouteGrant::Blocked) => break,
                Ok(RouteGrant::Pass) => {
                    // The circuit closed while slots were being taken.
                    self.return_unused(subject, Allowance::Slots(slots), 0).await;
                    return Ok(Some(Allowance::Unlimited));
                }
                Err(err) => {
                    self.return_unused(subject, Allowance::Slots(slots), 0).await;
                    return Err(err.into());
                }
            }
        }
        Ok((slots > 0).then_some(Allowance::Slots(slots)))
    }

    async fn return_unused(&self, subject: &CircuitSubject, allowance: Allowance, used: usize) {
        let Allowance::Slots(slots) = allowance else {
            return;
        };
        for _ in used..slots {
            if let Err(err) = self.routes.release_slot(subject).await {
                tracing::warn!(subject = %subject, error = %err, "failed to return a trial slot");
            }
        }
    }

    async fn return_all(&self, limited: &[(AgentId, CircuitSubject, usize)]) {
        for (_, subject, slots) in limited {
            self.return_unused(subject, Allowance::Slots(*slots), 0).await;
        }
    }

    fn subject_for(&self, message: &Message) -> CircuitSubject {
        self.settings
            .route_scope
            .subject(message.sender(), message.recipient())
    }

    async fn after_failure(&self, failed: &FailedDelivery) {
        log_failed_delivery(failed);
        let subject = self.subject_for(&failed.message);
        if let Err(err) = self.routes.record_failure(&subject).await {
            tracing::warn!(subject = %subject, error = %err, "failed to record delivery failure");
        }
    }
}

#[async_trait]
impl<M, L, H, C> PeriodicSweep for MessageCoordinator<M, L, H, C>
where
    M: MailboxRepository + 'static,
    L: AgentLiveness + 'static,
    H: RouteHealth + 'static,
    C: Clock + Send + Sync + 'static,
{
    type Error = CoordinatorServiceError;

    fn name(&self) -> &'static str {
        "coordinator.sweep_expired_leases"
    }

    async fn sweep(&self) -> Result<usize, Self::Error> {
        let report = self.sweep_expired_leases().await?;
        let purged = self.purge_dead_letters().await?;
        let settled = self.purge_settled_messages().await?;
        Ok(report.total().saturating_add(purged).saturating_add(settled))
    }
}

/// Deliveries a route admits in one receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Allowance {
    Unlimited,
    Slots(usize),
}

impl Allowance {
    fn cap(self, limit: usize) -> usize {
        match self {
            Self::Unlimited => limit,
            Self::Slots(slots) => slots.min(limit),
        }
    }
}

fn retention_cutoff(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(retention)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn route_unavailable(agent: &AgentId, reason: RouteBlock) -> CoordinatorServiceError {
    tracing::debug!(agent = %agent, %reason, "receive refused");
    CoordinatorServiceError::RouteUnavailable {
        agent: agent.clone(),
        reason,
    }
}

fn deadline(now: DateTime<Utc>, after: Duration) -> CoordinatorServiceResult<DateTime<Utc>> {
    TimeDelta::from_std(after)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or(CoordinatorServiceError::InvalidLeaseDuration(after))
}

fn log_failed_delivery(failed: &FailedDelivery) {
    let message = &failed.message;
    match failed.decision {
        RetryDecision::Requeued {
            attempt_count,
            available_at,
        } => tracing::info!(
            message_id = %message.id(),
            recipient = %message.recipient(),
            attempt_count,
            available_at = %available_at,
            reason = message.last_failure().unwrap_or_default(),
            "message scheduled for retry"
        ),
        RetryDecision::DeadLettered { attempt_count } => tracing::warn!(
            message_id = %message.id(),
            recipient = %message.recipient(),
            attempt_count,
            reason = message.last_failure().unwrap_or_default(),
            "message dead-lettered"
        ),
    }
}
