//! Diesel schema for agent registry persistence.

diesel::table! {
    /// Agent liveness registrations.
    coord_agents (namespace, agent_type, agent_instance) {
        /// Deployment namespace.
        #[max_length = 64]
        namespace -> Varchar,
        /// Agent type part of the identifier.
        #[max_length = 128]
        agent_type -> Varchar,
        /// Agent instance part of the identifier.
        #[max_length = 128]
        agent_instance -> Varchar,
        /// Lifecycle status (`active`, `expired`, `deregistered`).
        #[max_length = 20]
        status -> Varchar,
        /// Liveness TTL in seconds.
        ttl_seconds -> Int4,
        /// Free-form metadata as JSONB.
        metadata -> Jsonb,
        /// Registration timestamp.
        registered_at -> Timestamptz,
        /// Latest heartbeat timestamp.
        last_heartbeat_at -> Timestamptz,
        /// Liveness marker deadline.
        expires_at -> Timestamptz,
    }
}
