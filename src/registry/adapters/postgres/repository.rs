//! `PostgreSQL` repository implementation for agent registrations.

use super::{
    models::{AgentRow, NewAgentRow},
    schema::coord_agents,
};
use crate::registry::{
    domain::{
        AgentId, AgentRegistration, LivenessTtl, PersistedRegistrationData, RegistrationStatus,
    },
    ports::{
        AgentRegistryError, AgentRegistryRepository, AgentRegistryResult, RegistrationPageQuery,
    },
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
use diesel::upsert::excluded;
use std::collections::BTreeMap;

/// `PostgreSQL`-backed repository for agent registrations.
#[derive(Debug, Clone)]
pub struct PostgresAgentRegistry {
    pool: CoordinationPgPool,
    namespace: KeyNamespace,
}

impl PostgresAgentRegistry {
    /// Creates a new repository scoped to `namespace`.
    #[must_use]
    pub const fn new(pool: CoordinationPgPool, namespace: KeyNamespace) -> Self {
        Self { pool, namespace }
    }

    async fn run_blocking<F, T>(&self, operation: F) -> AgentRegistryResult<T>
    where
        F: FnOnce(&mut PgConnection, &str) -> AgentRegistryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let namespace = self.namespace.clone();
        run_blocking_with(
            move || {
                let mut connection = get_conn_with(&pool, AgentRegistryError::unavailable)?;
                operation(&mut connection, namespace.as_str())
            },
            AgentRegistryError::persistence,
        )
        .await
    }
}

impl From<DieselError> for AgentRegistryError {
    fn from(err: DieselError) -> Self {
        if is_transient_diesel_error(&err) {
            Self::unavailable(err)
        } else {
            Self::persistence(err)
        }
    }
}

#[async_trait]
impl AgentRegistryRepository for PostgresAgentRegistry {
    async fn upsert(&self, registration: &AgentRegistration) -> AgentRegistryResult<()> {
        let owned_registration = registration.clone();
        self.run_blocking(move |connection, namespace| {
            let row = to_new_row(namespace, &owned_registration)?;
            diesel::insert_into(coord_agents::table)
                .values(&row)
                .on_conflict((
                    coord_agents::namespace,
                    coord_agents::agent_type,
                    coord_agents::agent_instance,
                ))
                .do_update()
                .set((
                    coord_agents::status.eq(excluded(coord_agents::status)),
                    coord_agents::ttl_seconds.eq(excluded(coord_agents::ttl_seconds)),
                    coord_agents::metadata.eq(excluded(coord_agents::metadata)),
                    coord_agents::registered_at.eq(excluded(coord_agents::registered_at)),
                    coord_agents::last_heartbeat_at.eq(excluded(coord_agents::last_heartbeat_at)),
                    coord_agents::expires_at.eq(excluded(coord_agents::expires_at)),
                ))
                .execute(connection)?;
            Ok(())
        })
        .await
    }

    async fn record_heartbeat(
        &self,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> AgentRegistryResult<Option<AgentRegistration>> {
        let lookup_id = agent_id.clone();
        self.run_blocking(move |connection, namespace| {
            connection.transaction(|conn| {
                let Some(mut registration) = lock_registration(conn, namespace, &lookup_id)?
                    .filter(|found| found.status() != RegistrationStatus::Deregistered)
                else {
                    return Ok(None);
                };
                registration.heartbeat_at(now);
                write_liveness(conn, namespace, &registration)?;
                Ok(Some(registration))
            })
        })
        .await
    }

    async fn deregister(
        &self,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> AgentRegistryResult<Option<AgentRegistration>> {
        let lookup_id = agent_id.clone();
        self.run_blocking(move |connection, namespace| {
            connection.transaction(|conn| {
                let Some(mut registration) = lock_registration(conn, namespace, &lookup_id)? else {
                    return Ok(None);
                };
                registration.deregister_at(now);
                write_liveness(conn, namespace, &registration)?;
                Ok(Some(registration))
            })
        })
        .await
    }

    async fn find(&self, agent_id: &AgentId) -> AgentRegistryResult<Option<AgentRegistration>> {
        let lookup_id = agent_id.clone();
        self.run_blocking(move |connection, namespace| {
            let row = coord_agents::table
                .filter(coord_agents::namespace.eq(namespace))
                .filter(coord_agents::agent_type.eq(lookup_id.agent_type()))
                .filter(coord_agents::agent_instance.eq(lookup_id.instance()))
                .select(AgentRow::as_select())
                .first::<AgentRow>(connection)
                .optional()?;
            row.map(row_to_registration).transpose()
        })
        .await
    }

    async fn list_page(
        &self,
        query: &RegistrationPageQuery,
    ) -> AgentRegistryResult<Vec<AgentRegistration>> {
        let page_query = query.clone();
        self.run_blocking(move |connection, namespace| {
            let mut statement = coord_agents::table
                .filter(coord_agents::namespace.eq(namespace.to_owned()))
                .into_boxed();
            if let Some(agent_type) = page_query.agent_type {
                statement = statement.filter(coord_agents::agent_type.eq(agent_type));
            }
            if let Some(after) = page_query.after {
                let after_type = after.agent_type().to_owned();
                statement = statement.filter(
                    coord_agents::agent_type.gt(after_type.clone()).or(coord_agents::agent_type
                        .eq(after_type)
                        .and(coord_agents::agent_instance.gt(after.instance().to_owned()))),
                );
            }
            let rows = statement
                .order((coord_agents::agent_type, coord_agents::agent_instance))
                .limit(to_sql_limit(page_query.limit))
                .select(AgentRow::as_select())
                .load::<AgentRow>(connection)?;
            rows.into_iter().map(row_to_registration).collect()
        })
        .await
    }

    async fn expire_lapsed(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AgentRegistryResult<Vec<AgentId>> {
        self.run_blocking(move |connection, namespace| {
            connection.transaction(|conn| {
                let lapsed: Vec<(String, String)> = coord_agents::table
                    .filter(coord_agents::namespace.eq(namespace))
                    .filter(coord_agents::status.eq(RegistrationStatus::Active.as_str()))
                    .filter(coord_agents::expires_at.le(now))
                    .order(coord_agents::expires_at)
                    .limit(to_sql_limit(limit))
                    .select((coord_agents::agent_type, coord_agents::agent_instance))
                    .for_update()
                    .skip_locked()
                    .load(conn)?;

                let mut expired = Vec::with_capacity(lapsed.len());
                for (agent_type, agent_instance) in lapsed {
                    diesel::update(
                        coord_agents::table
                            .filter(coord_agents::namespace.eq(namespace))
                            .filter(coord_agents::agent_type.eq(&agent_type))
                            .filter(coord_agents::agent_instance.eq(&agent_instance)),
                    )
                    .set(coord_agents::status.eq(RegistrationStatus::Expired.as_str()))
                    .execute(conn)?;
                    expired.push(
                        AgentId::new(agent_type, agent_instance)
                            .map_err(AgentRegistryError::invalid_persisted_data)?,
                    );
                }
                Ok(expired)
            })
        })
        .await
    }
}

fn lock_registration(
    conn: &mut PgConnection,
    namespace: &str,
    agent_id: &AgentId,
) -> AgentRegistryResult<Option<AgentRegistration>> {
    let row = coord_agents::table
        .filter(coord_agents::namespace.eq(namespace))
        .filter(coord_agents::agent_type.eq(agent_id.agent_type()))
        .filter(coord_agents::agent_instance.eq(agent_id.instance()))
        .select(AgentRow::as_select())
        .for_update()
        .first::<AgentRow>(conn)
        .optional()?;
    row.map(row_to_registration).transpose()
}

fn write_liveness(
    conn: &mut PgConnection,
    namespace: &str,
    registration: &AgentRegistration,
) -> AgentRegistryResult<()> {
    let agent_id = registration.agent_id();
    diesel::update(
        coord_agents::table
            .filter(coord_agents::namespace.eq(namespace))
            .filter(coord_agents::agent_type.eq(agent_id.agent_type()))
            .filter(coord_agents::agent_instance.eq(agent_id.instance())),
    )
    .set((
        coord_agents::status.eq(registration.status().as_str()),
        coord_agents::last_heartbeat_at.eq(registration.last_heartbeat_at()),
        coord_agents::expires_at.eq(registration.expires_at()),
    ))
    .execute(conn)?;
    Ok(())
}

fn to_sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn to_new_row(namespace: &str, registration: &AgentRegistration) -> AgentRegistryResult<NewAgentRow> {
    let metadata =
        serde_json::to_value(registration.metadata()).map_err(AgentRegistryError::persistence)?;
    let ttl_seconds = i32::try_from(registration.ttl().seconds())
        .map_err(AgentRegistryError::persistence)?;
    let agent_id = registration.agent_id();

    Ok(NewAgentRow {
        namespace: namespace.to_owned(),
        agent_type: agent_id.agent_type().to_owned(),
        agent_instance: agent_id.instance().to_owned(),
        status: registration.status().as_str().to_owned(),
        ttl_seconds,
        metadata,
        registered_at: registration.registered_at(),
        last_heartbeat_at: registration.last_heartbeat_at(),
        expires_at: registration.expires_at(),
    })
}

fn row_to_registration(row: AgentRow) -> AgentRegistryResult<AgentRegistration> {
    let AgentRow {
        agent_type,
        agent_instance,
        status,
        ttl_seconds,
        metadata,
        registered_at,
        last_heartbeat_at,
        expires_at,
        ..
    } = row;

    let agent_id = AgentId::new(agent_type, agent_instance)
        .map_err(AgentRegistryError::invalid_persisted_data)?;
    let parsed_status = RegistrationStatus::try_from(status.as_str())
        .map_err(AgentRegistryError::invalid_persisted_data)?;
    let ttl_secs =
        u32::try_from(ttl_seconds).map_err(AgentRegistryError::invalid_persisted_data)?;
    let ttl = LivenessTtl::from_secs(ttl_secs).map_err(AgentRegistryError::invalid_persisted_data)?;
    let parsed_metadata: BTreeMap<String, String> =
        serde_json::from_value(metadata).map_err(AgentRegistryError::invalid_persisted_data)?;

    Ok(AgentRegistration::from_persisted(PersistedRegistrationData {
        agent_id,
        status: parsed_status,
        ttl,
        metadata: parsed_metadata,
        registered_at,
        last_heartbeat_at,
        expires_at,
    }))
}
