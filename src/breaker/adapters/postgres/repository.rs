//! `PostgreSQL` repository implementation for circuit state.
//!
//! The compare-and-swap is a single statement: an insert that does nothing
//! on conflict for a first write, or an update guarded by the expected
//! version. One affected row means the write won.

use super::{models::CircuitRow, schema::coord_circuits};
use crate::breaker::{
    domain::{CircuitPhase, CircuitState, CircuitSubject, PersistedCircuitData},
    ports::{CasOutcome, CircuitStateRepository, CircuitStoreError, CircuitStoreResult},
};
use crate::store::KeyNamespace;
use crate::store::postgres::{
    CoordinationPgPool, get_conn_with, is_transient_diesel_error, run_blocking_with,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::Error as DieselError;

/// `PostgreSQL`-backed repository for circuit state.
#[derive(Debug, Clone)]
pub struct PostgresCircuitStore {
    pool: CoordinationPgPool,
    namespace: KeyNamespace,
}

impl PostgresCircuitStore {
    /// Creates a new repository scoped to `namespace`.
    #[must_use]
    pub const fn new(pool: CoordinationPgPool, namespace: KeyNamespace) -> Self {
        Self { pool, namespace }
    }

    async fn run_blocking<F, T>(&self, operation: F) -> CircuitStoreResult<T>
    where
        F: FnOnce(&mut PgConnection, &str) -> CircuitStoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let namespace = self.namespace.clone();
        run_blocking_with(
            move || {
                let mut connection = get_conn_with(&pool, CircuitStoreError::unavailable)?;
                operation(&mut connection, namespace.as_str())
            },
            CircuitStoreError::persistence,
        )
        .await
    }
}

impl From<DieselError> for CircuitStoreError {
    fn from(err: DieselError) -> Self {
        if is_transient_diesel_error(&err) {
            Self::unavailable(err)
        } else {
            Self::persistence(err)
        }
    }
}

#[async_trait]
impl CircuitStateRepository for PostgresCircuitStore {
    async fn load(&self, subject: &CircuitSubject) -> CircuitStoreResult<Option<CircuitState>> {
        let lookup_subject = subject.clone();
        self.run_blocking(move |connection, namespace| {
            let row = coord_circuits::table
                .filter(coord_circuits::namespace.eq(namespace))
                .filter(coord_circuits::subject_key.eq(lookup_subject.key()))
                .select(CircuitRow::as_select())
                .first::<CircuitRow>(connection)
                .optional()?;
            row.map(|found| row_to_state(lookup_subject, found)).transpose()
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        expected_version: Option<u64>,
        state: &CircuitState,
        now: DateTime<Utc>,
    ) -> CircuitStoreResult<CasOutcome> {
        let candidate = state.clone();
        self.run_blocking(move |connection, namespace| {
            let row = to_row(namespace, &candidate, now)?;
            let affected = match expected_version {
                None => diesel::insert_into(coord_circuits::table)
                    .values(&row)
                    .on_conflict_do_nothing()
                    .execute(connection)?,
                Some(expected) => {
                    let expected_db =
                        i64::try_from(expected).map_err(CircuitStoreError::persistence)?;
                    diesel::update(
                        coord_circuits::table
                            .filter(coord_circuits::namespace.eq(namespace))
                            .filter(coord_circuits::subject_key.eq(&row.subject_key))
                            .filter(coord_circuits::version.eq(expected_db)),
                    )
                    .set(&row)
                    .execute(connection)?
                }
            };
            Ok(if affected == 1 {
                CasOutcome::Applied
            } else {
                CasOutcome::Conflict
            })
        })
        .await
    }
}

fn to_db_int(value: u32) -> CircuitStoreResult<i32> {
    i32::try_from(value).map_err(CircuitStoreError::persistence)
}

fn from_db_int(value: i32) -> CircuitStoreResult<u32> {
    u32::try_from(value).map_err(CircuitStoreError::invalid_persisted_data)
}

fn to_row(
    namespace: &str,
    state: &CircuitState,
    updated_at: DateTime<Utc>,
) -> CircuitStoreResult<CircuitRow> {
    Ok(CircuitRow {
        namespace: namespace.to_owned(),
        subject_key: state.subject().key(),
        phase: state.phase().as_str().to_owned(),
        consecutive_failures: to_db_int(state.consecutive_failures())?,
        consecutive_successes: to_db_int(state.consecutive_successes())?,
        opened_at: state.opened_at(),
        cooldown_seconds: to_db_int(state.cooldown_seconds())?,
        trip_count: to_db_int(state.trip_count())?,
        probes_in_flight: to_db_int(state.probes_in_flight())?,
        probe_started_at: state.probe_started_at(),
        version: i64::try_from(state.version()).map_err(CircuitStoreError::persistence)?,
        updated_at,
    })
}

fn row_to_state(subject: CircuitSubject, row: CircuitRow) -> CircuitStoreResult<CircuitState> {
    let phase = CircuitPhase::try_from(row.phase.as_str())
        .map_err(CircuitStoreError::invalid_persisted_data)?;
    Ok(CircuitState::from_persisted(PersistedCircuitData {
        subject,
        phase,
        consecutive_failures: from_db_int(row.consecutive_failures)?,
        consecutive_successes: from_db_int(row.consecutive_successes)?,
        opened_at: row.opened_at,
        cooldown_seconds: from_db_int(row.cooldown_seconds)?,
        trip_count: from_db_int(row.trip_count)?,
        probes_in_flight: from_db_int(row.probes_in_flight)?,
        probe_started_at: row.probe_started_at,
        version: u64::try_from(row.version).map_err(CircuitStoreError::invalid_persisted_data)?,
    }))
}
