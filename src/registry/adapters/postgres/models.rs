//! Diesel row models for agent registry persistence.

use super::schema::coord_agents;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Query result row for agent registrations.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = coord_agents)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AgentRow {
    /// Deployment namespace.
    pub namespace: String,
    /// Agent type.
    pub agent_type: String,
    /// Agent instance.
    pub agent_instance: String,
    /// Lifecycle status.
    pub status: String,
    /// Liveness TTL in seconds.
    pub ttl_seconds: i32,
    /// Metadata object.
    pub metadata: Value,
    /// Registration timestamp.
    pub registered_at: DateTime<Utc>,
    /// Latest heartbeat timestamp.
    pub last_heartbeat_at: DateTime<Utc>,
    /// Liveness marker deadline.
    pub expires_at: DateTime<Utc>,
}

/// Insert model for agent registrations.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = coord_agents)]
pub struct NewAgentRow {
    /// Deployment namespace.
    pub namespace: String,
    /// Agent type.
    pub agent_type: String,
    /// Agent instance.
    pub agent_instance: String,
    /// Lifecycle status.
    pub status: String,
    /// Liveness TTL in seconds.
    pub ttl_seconds: i32,
    /// Metadata object.
    pub metadata: Value,
    /// Registration timestamp.
    pub registered_at: DateTime<Utc>,
    /// Latest heartbeat timestamp.
    pub last_heartbeat_at: DateTime<Utc>,
    /// Liveness marker deadline.
    pub expires_at: DateTime<Utc>,
}
