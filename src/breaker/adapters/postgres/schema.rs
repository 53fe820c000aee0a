//! Diesel schema for circuit state persistence.

diesel::table! {
    /// One row per circuit subject.
    coord_circuits (namespace, subject_key) {
        /// Deployment namespace.
        #[max_length = 64]
        namespace -> Varchar,
        /// Stable subject key (`agent:...` or `route:...`).
        #[max_length = 300]
        subject_key -> Varchar,
        /// Phase (`closed`, `open`, `half_open`).
        #[max_length = 20]
        phase -> Varchar,
        /// Consecutive failures.
        consecutive_failures -> Int4,
        /// Consecutive successes.
        consecutive_successes -> Int4,
        /// Instant of the latest trip.
        opened_at -> Nullable<Timestamptz>,
        /// Current cooldown in seconds.
        cooldown_seconds -> Int4,
        /// Number of trips.
        trip_count -> Int4,
        /// Outstanding probes.
        probes_in_flight -> Int4,
        /// Instant the latest probe was admitted.
        probe_started_at -> Nullable<Timestamptz>,
        /// Compare-and-swap version.
        version -> Int8,
        /// Last write timestamp.
        updated_at -> Timestamptz,
    }
}
