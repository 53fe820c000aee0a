//! `PostgreSQL` plumbing shared by the per-context Diesel adapters.
//!
//! `PostgreSQL` is the production shared store: row locks and single
//! transactions give the cross-process atomicity every coordination primitive
//! relies on. Diesel is synchronous, so all calls are offloaded to the
//! blocking thread pool via [`tokio::task::spawn_blocking`].

use crate::config::StoreConfig;
use diesel::PgConnection;
use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, Pool, PoolError, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

/// `PostgreSQL` connection pool type shared by all coordination adapters.
pub type CoordinationPgPool = Pool<ConnectionManager<PgConnection>>;

/// Pooled connection type for adapter internals.
pub(crate) type PooledConn = PooledConnection<ConnectionManager<PgConnection>>;

/// Schema for the coordination tables.
pub const SCHEMA_SQL: &str =
    include_str!("../../migrations/2026-10-01-000000_create_coordination_tables/up.sql");

/// Errors raised while preparing the `PostgreSQL` store.
#[derive(Debug, Error)]
pub enum PostgresSetupError {
    /// The connection pool could not be built.
    #[error("failed to build connection pool: {0}")]
    Pool(#[from] PoolError),

    /// The schema could not be applied.
    #[error("failed to apply coordination schema: {0}")]
    Schema(#[source] DieselError),

    /// No database URL is configured.
    #[error("no store URL configured")]
    MissingUrl,

    /// The blocking setup task panicked or was cancelled.
    #[error("setup task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Builds a connection pool for the given database URL.
///
/// # Errors
///
/// Returns [`PostgresSetupError::Pool`] when the pool cannot establish its
/// initial connections.
pub fn build_pool(url: &str, max_size: u32) -> Result<CoordinationPgPool, PostgresSetupError> {
    let manager = ConnectionManager::<PgConnection>::new(url);
    Ok(Pool::builder().max_size(max_size.max(1)).build(manager)?)
}

/// Builds a connection pool from configuration, merging credentials into
/// the URL.
///
/// # Errors
///
/// Returns [`PostgresSetupError::MissingUrl`] when no URL is configured, or
/// [`PostgresSetupError::Pool`] when the pool cannot connect.
pub fn connect(config: &StoreConfig) -> Result<CoordinationPgPool, PostgresSetupError> {
    let url = config
        .connection_url()
        .ok_or(PostgresSetupError::MissingUrl)?;
    build_pool(&url, config.pool_size)
}

/// Creates the coordination tables when they do not exist yet.
///
/// # Errors
///
/// Returns [`PostgresSetupError`] when a connection cannot be obtained or the
/// schema statements fail.
pub async fn apply_schema(pool: &CoordinationPgPool) -> Result<(), PostgresSetupError> {
    let shared_pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = shared_pool.get()?;
        conn.batch_execute(SCHEMA_SQL)
            .map_err(PostgresSetupError::Schema)
    })
    .await?
}

/// Runs a blocking task and maps join errors into the caller's error type.
pub(crate) async fn run_blocking_with<F, T, E, M>(f: F, map_err: M) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    M: FnOnce(tokio::task::JoinError) -> E,
{
    tokio::task::spawn_blocking(f).await.map_err(map_err)?
}

/// Obtains a connection from the pool with a caller-provided error mapper.
pub(crate) fn get_conn_with<E, M>(pool: &CoordinationPgPool, map_err: M) -> Result<PooledConn, E>
where
    M: FnOnce(PoolError) -> E,
{
    pool.get().map_err(map_err)
}

/// Returns `true` for Diesel errors that a fresh attempt may not repeat.
///
/// Covers dropped connections and serialization failures raised when two
/// transactions race for the same rows.
pub(crate) fn is_transient_diesel_error(err: &DieselError) -> bool {
    matches!(
        err,
        DieselError::DatabaseError(
            DatabaseErrorKind::ClosedConnection | DatabaseErrorKind::SerializationFailure,
            _
        ) | DieselError::BrokenTransactionManager
    )
}
