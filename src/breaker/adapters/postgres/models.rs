//! Diesel row models for circuit state.

use super::schema::coord_circuits;
use chrono::{DateTime, Utc};
use diesel::prelude::*;

/// Row for circuit state; used for both reads and inserts.
#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = coord_circuits)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
#[diesel(primary_key(namespace, subject_key))]
pub struct CircuitRow {
    /// Deployment namespace.
    pub namespace: String,
    /// Stable subject key.
    pub subject_key: String,
    /// Phase.
    pub phase: String,
    /// Consecutive failures.
    pub consecutive_failures: i32,
    /// Consecutive successes.
    pub consecutive_successes: i32,
    /// Instant of the latest trip.
    pub opened_at: Option<DateTime<Utc>>,
    /// Current cooldown in seconds.
    pub cooldown_seconds: i32,
    /// Number of trips.
    pub trip_count: i32,
    /// Outstanding probes.
    pub probes_in_flight: i32,
    /// Instant the latest probe was admitted.
    pub probe_started_at: Option<DateTime<Utc>>,
    /// Compare-and-swap version.
    pub version: i64,
    /// Last write timestamp.
    pub updated_at: DateTime<Utc>,
}
