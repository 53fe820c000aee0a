//! Diesel row models for mailbox persistence.

use super::schema::{coord_dead_letters, coord_messages};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

/// Query result row for messages.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = coord_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MessageRow {
    /// Message identifier.
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    pub id: Uuid,
    /// Sender type.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub sender_type: String,
    /// Sender instance.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub sender_instance: String,
    /// Recipient type.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub recipient_type: String,
    /// Recipient instance.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub recipient_instance: String,
    /// Opaque payload.
    #[diesel(sql_type = diesel::sql_types::Bytea)]
    pub payload: Vec<u8>,
    /// Priority rank.
    #[diesel(sql_type = diesel::sql_types::SmallInt)]
    pub priority: i16,
    /// Lifecycle status.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub status: String,
    /// Failed attempts.
    #[diesel(sql_type = diesel::sql_types::Integer)]
    pub attempt_count: i32,
    /// Retries allowed.
    #[diesel(sql_type = diesel::sql_types::Integer)]
    pub max_retries: i32,
    /// Position within the priority band.
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub enqueue_seq: i64,
    /// Token of the active lease.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Uuid>)]
    pub lease_token: Option<Uuid>,
    /// Deadline of the active lease.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Timestamptz>)]
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Token of the lease that ended the latest attempt.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Uuid>)]
    pub settled_lease_token: Option<Uuid>,
    /// Earliest lease instant.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub available_at: DateTime<Utc>,
    /// Reason of the latest failure.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Text>)]
    pub last_failure: Option<String>,
    /// Creation timestamp.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub updated_at: DateTime<Utc>,
}

/// Insert model for messages; the enqueue sequence comes from the column
/// default.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = coord_messages)]
pub struct NewMessageRow {
    /// Message identifier.
    pub id: Uuid,
    /// Deployment namespace.
    pub namespace: String,
    /// Sender type.
    pub sender_type: String,
    /// Sender instance.
    pub sender_instance: String,
    /// Sender in `type/instance` form.
    pub sender_key: String,
    /// Recipient type.
    pub recipient_type: String,
    /// Recipient instance.
    pub recipient_instance: String,
    /// Opaque payload.
    pub payload: Vec<u8>,
    /// Priority rank.
    pub priority: i16,
    /// Lifecycle status.
    pub status: String,
    /// Failed attempts.
    pub attempt_count: i32,
    /// Retries allowed.
    pub max_retries: i32,
    /// Earliest lease instant.
    pub available_at: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Mutable delivery columns written after every transition.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = coord_messages)]
#[diesel(treat_none_as_null = true)]
pub struct MessageChangeset {
    /// Lifecycle status.
    pub status: String,
    /// Failed attempts.
    pub attempt_count: i32,
    /// Token of the active lease.
    pub lease_token: Option<Uuid>,
    /// Deadline of the active lease.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Token of the lease that ended the latest attempt.
    pub settled_lease_token: Option<Uuid>,
    /// Earliest lease instant.
    pub available_at: DateTime<Utc>,
    /// Reason of the latest failure.
    pub last_failure: Option<String>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Row for dead letters; used for both reads and inserts.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = coord_dead_letters)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DeadLetterRow {
    /// Identifier of the dead-lettered message.
    pub message_id: Uuid,
    /// Deployment namespace.
    pub namespace: String,
    /// Recipient type.
    pub recipient_type: String,
    /// Recipient instance.
    pub recipient_instance: String,
    /// Reason given by the final failure.
    pub failure_reason: String,
    /// Message snapshot.
    pub snapshot: Value,
    /// Dead-letter timestamp.
    pub moved_at: DateTime<Utc>,
}
