//! Diesel schema for mailbox persistence.

diesel::table! {
    /// Messages in every mailbox, including terminal ones.
    coord_messages (id) {
        /// Message identifier.
        id -> Uuid,
        /// Deployment namespace.
        #[max_length = 64]
        namespace -> Varchar,
        /// Sender type.
        #[max_length = 128]
        sender_type -> Varchar,
        /// Sender instance.
        #[max_length = 128]
        sender_instance -> Varchar,
        /// Sender in `type/instance` form, for exclusion filters.
        #[max_length = 257]
        sender_key -> Varchar,
        /// Recipient type.
        #[max_length = 128]
        recipient_type -> Varchar,
        /// Recipient instance.
        #[max_length = 128]
        recipient_instance -> Varchar,
        /// Opaque payload.
        payload -> Bytea,
        /// Priority rank; higher is served first.
        priority -> Int2,
        /// Lifecycle status.
        #[max_length = 20]
        status -> Varchar,
        /// Failed attempts.
        attempt_count -> Int4,
        /// Retries allowed.
        max_retries -> Int4,
        /// Position within the priority band.
        enqueue_seq -> Int8,
        /// Token of the active lease.
        lease_token -> Nullable<Uuid>,
        /// Deadline of the active lease.
        lease_expires_at -> Nullable<Timestamptz>,
        /// Token of the lease that ended the latest attempt.
        settled_lease_token -> Nullable<Uuid>,
        /// Earliest lease instant.
        available_at -> Timestamptz,
        /// Reason of the latest failure.
        last_failure -> Nullable<Text>,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Append-only dead-letter collection.
    coord_dead_letters (message_id) {
        /// Identifier of the dead-lettered message.
        message_id -> Uuid,
        /// Deployment namespace.
        #[max_length = 64]
        namespace -> Varchar,
        /// Recipient type.
        #[max_length = 128]
        recipient_type -> Varchar,
        /// Recipient instance.
        #[max_length = 128]
        recipient_instance -> Varchar,
        /// Reason given by the final failure.
        failure_reason -> Text,
        /// Message snapshot as JSONB.
        snapshot -> Jsonb,
        /// Dead-letter timestamp.
        moved_at -> Timestamptz,
    }
}
