//! `PostgreSQL` repository implementation for mailboxes and dead letters.

use super::{
    models::{DeadLetterRow, MessageChangeset, MessageRow, NewMessageRow},
    schema::{coord_dead_letters, coord_messages},
};
use crate::coordinator::{
    domain::{
        DeadLetterEntry, LEASE_EXPIRED_REASON, Lease, LeaseToken, Message, MessageId,
        MessageStatus, PersistedMessageData, Priority, RetryBackoff, RetryDecision,
    },
    ports::{
        FailedDelivery, LeaseRequest, MailboxDepth, MailboxError, MailboxRepository,
        MailboxResult,
    },
};
use crate::registry::domain::AgentId;
use crate::store::KeyNamespace;
use crate::store::postgres::{
    CoordinationPgPool, get_conn_with, is_transient_diesel_error, run_blocking_with,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use std::cmp::Reverse;

const QUEUED_STATUSES: [&str; 2] = [
    MessageStatus::Pending.as_str(),
    MessageStatus::Retrying.as_str(),
];

/// `PostgreSQL`-backed mailbox repository.
///
/// Leasing is a single `UPDATE ... WHERE id IN (SELECT ... FOR UPDATE SKIP
/// LOCKED)` statement, so concurrent receivers on the same mailbox never
/// observe the same message.
#[derive(Debug, Clone)]
pub struct PostgresMailboxStore {
    pool: CoordinationPgPool,
    namespace: KeyNamespace,
}

impl PostgresMailboxStore {
    /// Creates a new repository scoped to `namespace`.
    #[must_use]
    pub const fn new(pool: CoordinationPgPool, namespace: KeyNamespace) -> Self {
        Self { pool, namespace }
    }

    async fn run_blocking<F, T>(&self, operation: F) -> MailboxResult<T>
    where
        F: FnOnce(&mut PgConnection, &str) -> MailboxResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let namespace = self.namespace.clone();
        run_blocking_with(
            move || {
                let mut connection = get_conn_with(&pool, MailboxError::unavailable)?;
                operation(&mut connection, namespace.as_str())
            },
            MailboxError::persistence,
        )
        .await
    }

    async fn with_leased<F, T>(
        &self,
        id: MessageId,
        token: LeaseToken,
        now: DateTime<Utc>,
        apply: F,
    ) -> MailboxResult<T>
    where
        F: FnOnce(&mut PgConnection, &str, Message) -> MailboxResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_blocking(move |connection, namespace| {
            connection.transaction(|conn| {
                let message = lock_message(conn, namespace, id)?
                    .ok_or(MailboxError::UnknownMessage(id))?;
                message
                    .check_lease(token, now)
                    .map_err(|violation| MailboxError::from_violation(id, violation))?;
                apply(conn, namespace, message)
            })
        })
        .await
    }
}

impl From<DieselError> for MailboxError {
    fn from(err: DieselError) -> Self {
        if is_transient_diesel_error(&err) {
            Self::unavailable(err)
        } else {
            Self::persistence(err)
        }
    }
}

#[async_trait]
impl MailboxRepository for PostgresMailboxStore {
    async fn enqueue(&self, message: &Message) -> MailboxResult<Message> {
        let draft = message.clone();
        self.run_blocking(move |connection, namespace| {
            let row = to_new_row(namespace, &draft)?;
            let inserted = diesel::insert_into(coord_messages::table)
                .values(&row)
                .on_conflict(coord_messages::id)
                .do_nothing()
                .returning(MessageRow::as_returning())
                .get_result::<MessageRow>(connection)
                .optional()?;
            // A replayed enqueue finds the row its first attempt committed.
            let stored = match inserted {
                Some(stored) => stored,
                None => coord_messages::table
                    .filter(coord_messages::namespace.eq(namespace))
                    .filter(coord_messages::id.eq(row.id))
                    .select(MessageRow::as_select())
                    .first::<MessageRow>(connection)?,
            };
            row_to_message(stored)
        })
        .await
    }

    async fn lease_batch(&self, request: &LeaseRequest) -> MailboxResult<Vec<Message>> {
        let lease_request = request.clone();
        self.run_blocking(move |connection, namespace| {
            let excluded: Vec<String> = lease_request
                .excluded_senders
                .iter()
                .map(ToString::to_string)
                .collect();
            let query = diesel::sql_query(concat!(
                "UPDATE coord_messages SET status = 'in_flight', lease_token = $1, ",
                "lease_expires_at = $2, updated_at = $3 ",
                "WHERE id IN (",
                "SELECT id FROM coord_messages ",
                "WHERE namespace = $4 AND recipient_type = $5 AND recipient_instance = $6 ",
                "AND status IN ('pending', 'retrying') AND available_at <= $3 ",
                "AND NOT (sender_key = ANY($7)) ",
                "AND ($9::text IS NULL OR sender_key = $9) ",
                "ORDER BY priority DESC, enqueue_seq ASC ",
                "LIMIT $8 FOR UPDATE SKIP LOCKED) ",
                "RETURNING id, sender_type, sender_instance, recipient_type, ",
                "recipient_instance, payload, priority, status, attempt_count, max_retries, ",
                "enqueue_seq, lease_token, lease_expires_at, settled_lease_token, available_at, ",
                "last_failure, ",
                "created_at, updated_at",
            ))
            .bind::<diesel::sql_types::Uuid, _>(lease_request.lease.token().into_inner())
            .bind::<diesel::sql_types::Timestamptz, _>(lease_request.lease.expires_at())
            .bind::<diesel::sql_types::Timestamptz, _>(lease_request.now)
            .bind::<diesel::sql_types::Text, _>(namespace)
            .bind::<diesel::sql_types::Text, _>(lease_request.recipient.agent_type())
            .bind::<diesel::sql_types::Text, _>(lease_request.recipient.instance())
            .bind::<diesel::sql_types::Array<diesel::sql_types::Text>, _>(excluded)
            .bind::<diesel::sql_types::BigInt, _>(to_sql_limit(lease_request.limit))
            .bind::<diesel::sql_types::Nullable<diesel::sql_types::Text>, _>(
                lease_request.only_sender.as_ref().map(ToString::to_string),
            );

            let rows = query.load::<MessageRow>(connection)?;
            let mut leased = rows
                .into_iter()
                .map(row_to_message)
                .collect::<MailboxResult<Vec<_>>>()?;
            // RETURNING does not preserve the subquery order.
            leased.sort_by_key(|message| (Reverse(message.priority()), message.enqueue_seq()));
            Ok(leased)
        })
        .await
    }

    async fn acknowledge(
        &self,
        id: MessageId,
        token: LeaseToken,
        now: DateTime<Utc>,
    ) -> MailboxResult<Message> {
        self.with_leased(id, token, now, move |conn, namespace, mut message| {
            message.acknowledge(now);
            write_message(conn, namespace, &message)?;
            Ok(message)
        })
        .await
    }

    async fn release(
        &self,
        id: MessageId,
        token: LeaseToken,
        reason: &str,
        now: DateTime<Utc>,
        backoff: &RetryBackoff,
    ) -> MailboxResult<FailedDelivery> {
        let failure_reason = reason.to_owned();
        let retry_backoff = *backoff;
        self.with_leased(id, token, now, move |conn, namespace, message| {
            fail_message(conn, namespace, message, &failure_reason, now, &retry_backoff)
        })
        .await
    }

    async fn extend_lease(
        &self,
        id: MessageId,
        token: LeaseToken,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> MailboxResult<Message> {
        self.with_leased(id, token, now, move |conn, namespace, mut message| {
            message.extend_lease(expires_at, now);
            write_message(conn, namespace, &message)?;
            Ok(message)
        })
        .await
    }

    async fn release_expired(
        &self,
        now: DateTime<Utc>,
        backoff: &RetryBackoff,
        limit: usize,
    ) -> MailboxResult<Vec<FailedDelivery>> {
        let retry_backoff = *backoff;
        self.run_blocking(move |connection, namespace| {
            connection.transaction(|conn| {
                let lapsed = coord_messages::table
                    .filter(coord_messages::namespace.eq(namespace))
                    .filter(coord_messages::status.eq(MessageStatus::InFlight.as_str()))
                    .filter(coord_messages::lease_expires_at.le(now))
                    .order(coord_messages::lease_expires_at)
                    .limit(to_sql_limit(limit))
                    .select(MessageRow::as_select())
                    .for_update()
                    .skip_locked()
                    .load::<MessageRow>(conn)?;

                lapsed
                    .into_iter()
                    .map(|row| {
                        let message = row_to_message(row)?;
                        fail_message(conn, namespace, message, LEASE_EXPIRED_REASON, now, &retry_backoff)
                    })
                    .collect()
            })
        })
        .await
    }

    async fn find(&self, id: MessageId) -> MailboxResult<Option<Message>> {
        self.run_blocking(move |connection, namespace| {
            let row = coord_messages::table
                .filter(coord_messages::namespace.eq(namespace))
                .filter(coord_messages::id.eq(id.into_inner()))
                .select(MessageRow::as_select())
                .first::<MessageRow>(connection)
                .optional()?;
            row.map(row_to_message).transpose()
        })
        .await
    }

    async fn pending_senders(
        &self,
        recipient: &AgentId,
        now: DateTime<Utc>,
    ) -> MailboxResult<Vec<AgentId>> {
        let mailbox_owner = recipient.clone();
        self.run_blocking(move |connection, namespace| {
            let senders: Vec<(String, String)> = coord_messages::table
                .filter(coord_messages::namespace.eq(namespace))
                .filter(coord_messages::recipient_type.eq(mailbox_owner.agent_type()))
                .filter(coord_messages::recipient_instance.eq(mailbox_owner.instance()))
                .filter(coord_messages::status.eq_any(QUEUED_STATUSES))
                .filter(coord_messages::available_at.le(now))
                .select((coord_messages::sender_type, coord_messages::sender_instance))
                .distinct()
                .order((coord_messages::sender_type, coord_messages::sender_instance))
                .load(connection)?;
            senders
                .into_iter()
                .map(|(agent_type, instance)| {
                    AgentId::new(agent_type, instance).map_err(MailboxError::invalid_persisted_data)
                })
                .collect()
        })
        .await
    }

    async fn depth(&self, recipient: &AgentId) -> MailboxResult<MailboxDepth> {
        let mailbox_owner = recipient.clone();
        self.run_blocking(move |connection, namespace| {
            let queued = count_in_mailbox(connection, namespace, &mailbox_owner, &QUEUED_STATUSES)?;
            let in_flight = count_in_mailbox(
                connection,
                namespace,
                &mailbox_owner,
                &[MessageStatus::InFlight.as_str()],
            )?;
            Ok(MailboxDepth { queued, in_flight })
        })
        .await
    }

    async fn dead_letters(
        &self,
        recipient: Option<AgentId>,
        limit: usize,
    ) -> MailboxResult<Vec<DeadLetterEntry>> {
        self.run_blocking(move |connection, namespace| {
            let mut statement = coord_dead_letters::table
                .filter(coord_dead_letters::namespace.eq(namespace.to_owned()))
                .into_boxed();
            if let Some(agent) = recipient {
                statement = statement
                    .filter(coord_dead_letters::recipient_type.eq(agent.agent_type().to_owned()))
                    .filter(coord_dead_letters::recipient_instance.eq(agent.instance().to_owned()));
            }
            let rows = statement
                .order((coord_dead_letters::moved_at, coord_dead_letters::message_id))
                .limit(to_sql_limit(limit))
                .select(DeadLetterRow::as_select())
                .load::<DeadLetterRow>(connection)?;
            rows.into_iter().map(row_to_dead_letter).collect()
        })
        .await
    }

    async fn purge_settled(&self, cutoff: DateTime<Utc>, limit: usize) -> MailboxResult<usize> {
        self.run_blocking(move |connection, namespace| {
            let purged = diesel::sql_query(concat!(
                "DELETE FROM coord_messages WHERE id IN (",
                "SELECT id FROM coord_messages ",
                "WHERE namespace = $1 AND status IN ('delivered', 'dead_lettered') ",
                "AND updated_at < $2 ",
                "ORDER BY updated_at LIMIT $3 FOR UPDATE SKIP LOCKED)",
            ))
            .bind::<diesel::sql_types::Text, _>(namespace)
            .bind::<diesel::sql_types::Timestamptz, _>(cutoff)
            .bind::<diesel::sql_types::BigInt, _>(to_sql_limit(limit))
            .execute(connection)?;
            Ok(purged)
        })
        .await
    }

    async fn purge_dead_letters(&self, cutoff: DateTime<Utc>) -> MailboxResult<usize> {
        self.run_blocking(move |connection, namespace| {
            let purged = diesel::delete(
                coord_dead_letters::table
                    .filter(coord_dead_letters::namespace.eq(namespace))
                    .filter(coord_dead_letters::moved_at.lt(cutoff)),
            )
            .execute(connection)?;
            Ok(purged)
        })
        .await
    }
}

fn lock_message(
    conn: &mut PgConnection,
    namespace: &str,
    id: MessageId,
) -> MailboxResult<Option<Message>> {
    let row = coord_messages::table
        .filter(coord_messages::namespace.eq(namespace))
        .filter(coord_messages::id.eq(id.into_inner()))
        .select(MessageRow::as_select())
        .for_update()
        .first::<MessageRow>(conn)
        .optional()?;
    row.map(row_to_message).transpose()
}

fn write_message(conn: &mut PgConnection, namespace: &str, message: &Message) -> MailboxResult<()> {
    diesel::update(
        coord_messages::table
            .filter(coord_messages::namespace.eq(namespace))
            .filter(coord_messages::id.eq(message.id().into_inner())),
    )
    .set(&to_changeset(message)?)
    .execute(conn)?;
    Ok(())
}

/// Writes a requeued message at the back of its priority band and returns
/// the fresh sequence.
fn write_requeued(conn: &mut PgConnection, namespace: &str, message: &Message) -> MailboxResult<u64> {
    let seq = diesel::update(
        coord_messages::table
            .filter(coord_messages::namespace.eq(namespace))
            .filter(coord_messages::id.eq(message.id().into_inner())),
    )
    .set((
        &to_changeset(message)?,
        coord_messages::enqueue_seq.eq(diesel::dsl::sql::<diesel::sql_types::BigInt>(
            "nextval('coord_enqueue_seq')",
        )),
    ))
    .returning(coord_messages::enqueue_seq)
    .get_result::<i64>(conn)?;
    u64::try_from(seq).map_err(MailboxError::invalid_persisted_data)
}

fn fail_message(
    conn: &mut PgConnection,
    namespace: &str,
    mut message: Message,
    reason: &str,
    now: DateTime<Utc>,
    backoff: &RetryBackoff,
) -> MailboxResult<FailedDelivery> {
    let decision = message.fail(reason, now, backoff);
    match decision {
        RetryDecision::Requeued { .. } => {
            let seq = write_requeued(conn, namespace, &message)?;
            message.assign_enqueue_seq(seq);
        }
        RetryDecision::DeadLettered { .. } => {
            write_message(conn, namespace, &message)?;
            let entry = DeadLetterEntry::new(message.clone(), reason, now);
            diesel::insert_into(coord_dead_letters::table)
                .values(&to_dead_letter_row(namespace, &entry)?)
                .on_conflict(coord_dead_letters::message_id)
                .do_nothing()
                .execute(conn)?;
        }
    }
    Ok(FailedDelivery { message, decision })
}

fn count_in_mailbox(
    conn: &mut PgConnection,
    namespace: &str,
    recipient: &AgentId,
    statuses: &[&str],
) -> MailboxResult<usize> {
    let count = coord_messages::table
        .filter(coord_messages::namespace.eq(namespace))
        .filter(coord_messages::recipient_type.eq(recipient.agent_type()))
        .filter(coord_messages::recipient_instance.eq(recipient.instance()))
        .filter(coord_messages::status.eq_any(statuses.iter().copied()))
        .count()
        .get_result::<i64>(conn)?;
    usize::try_from(count).map_err(MailboxError::invalid_persisted_data)
}

fn to_sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn to_sql_count(value: u32) -> MailboxResult<i32> {
    i32::try_from(value).map_err(MailboxError::persistence)
}

fn to_new_row(namespace: &str, message: &Message) -> MailboxResult<NewMessageRow> {
    let sender = message.sender();
    let recipient = message.recipient();
    Ok(NewMessageRow {
        id: message.id().into_inner(),
        namespace: namespace.to_owned(),
        sender_type: sender.agent_type().to_owned(),
        sender_instance: sender.instance().to_owned(),
        sender_key: sender.to_string(),
        recipient_type: recipient.agent_type().to_owned(),
        recipient_instance: recipient.instance().to_owned(),
        payload: message.payload().to_vec(),
        priority: message.priority().rank(),
        status: message.status().as_str().to_owned(),
        attempt_count: to_sql_count(message.attempt_count())?,
        max_retries: to_sql_count(message.max_retries())?,
        available_at: message.available_at(),
        created_at: message.created_at(),
        updated_at: message.updated_at(),
    })
}

fn to_changeset(message: &Message) -> MailboxResult<MessageChangeset> {
    Ok(MessageChangeset {
        status: message.status().as_str().to_owned(),
        attempt_count: to_sql_count(message.attempt_count())?,
        lease_token: message.lease().map(|lease| lease.token().into_inner()),
        lease_expires_at: message.lease().map(Lease::expires_at),
        settled_lease_token: message.settled_by().map(LeaseToken::into_inner),
        available_at: message.available_at(),
        last_failure: message.last_failure().map(str::to_owned),
        updated_at: message.updated_at(),
    })
}

fn row_to_message(row: MessageRow) -> MailboxResult<Message> {
    let MessageRow {
        id,
        sender_type,
        sender_instance,
        recipient_type,
        recipient_instance,
        payload,
        priority,
        status,
        attempt_count,
        max_retries,
        enqueue_seq,
        lease_token,
        lease_expires_at,
        settled_lease_token,
        available_at,
        last_failure,
        created_at,
        updated_at,
    } = row;

    let sender = AgentId::new(sender_type, sender_instance)
        .map_err(MailboxError::invalid_persisted_data)?;
    let recipient = AgentId::new(recipient_type, recipient_instance)
        .map_err(MailboxError::invalid_persisted_data)?;
    let parsed_priority =
        Priority::try_from(priority).map_err(MailboxError::invalid_persisted_data)?;
    let parsed_status =
        MessageStatus::try_from(status.as_str()).map_err(MailboxError::invalid_persisted_data)?;
    let lease = lease_token
        .zip(lease_expires_at)
        .map(|(token, expires_at)| Lease::new(LeaseToken::from_uuid(token), expires_at));

    Ok(Message::from_persisted(PersistedMessageData {
        id: MessageId::from_uuid(id),
        sender,
        recipient,
        payload,
        priority: parsed_priority,
        status: parsed_status,
        attempt_count: u32::try_from(attempt_count)
            .map_err(MailboxError::invalid_persisted_data)?,
        max_retries: u32::try_from(max_retries).map_err(MailboxError::invalid_persisted_data)?,
        enqueue_seq: u64::try_from(enqueue_seq).map_err(MailboxError::invalid_persisted_data)?,
        lease,
        settled_by: settled_lease_token.map(LeaseToken::from_uuid),
        available_at,
        last_failure,
        created_at,
        updated_at,
    }))
}

fn to_dead_letter_row(namespace: &str, entry: &DeadLetterEntry) -> MailboxResult<DeadLetterRow> {
    let recipient = entry.message().recipient();
    let snapshot = serde_json::to_value(entry.message()).map_err(MailboxError::persistence)?;
    Ok(DeadLetterRow {
        message_id: entry.message().id().into_inner(),
        namespace: namespace.to_owned(),
        recipient_type: recipient.agent_type().to_owned(),
        recipient_instance: recipient.instance().to_owned(),
        failure_reason: entry.failure_reason().to_owned(),
        snapshot,
        moved_at: entry.moved_at(),
    })
}

fn row_to_dead_letter(row: DeadLetterRow) -> MailboxResult<DeadLetterEntry> {
    let message = serde_json::from_value::<Message>(row.snapshot)
        .map_err(MailboxError::invalid_persisted_data)?;
    Ok(DeadLetterEntry::new(message, row.failure_reason, row.moved_at))
}
