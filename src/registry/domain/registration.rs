//! Agent registration aggregate root.

use super::{AgentId, RegistrationStatus, RegistryDomainError};
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default liveness TTL in seconds.
pub const DEFAULT_TTL_SECONDS: u32 = 30;

/// Lifetime of a liveness marker, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LivenessTtl(u32);

impl LivenessTtl {
    /// Creates a TTL of the given number of seconds.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryDomainError::ZeroTtl`] when `seconds` is zero.
    pub const fn from_secs(seconds: u32) -> Result<Self, RegistryDomainError> {
        if seconds == 0 {
            return Err(RegistryDomainError::ZeroTtl);
        }
        Ok(Self(seconds))
    }

    /// Returns the TTL in seconds.
    #[must_use]
    pub const fn seconds(self) -> u32 {
        self.0
    }

    /// Returns the TTL as a [`Duration`].
    #[must_use]
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(u64::from(self.0))
    }

    fn deadline_from(self, instant: DateTime<Utc>) -> DateTime<Utc> {
        instant + TimeDelta::seconds(i64::from(self.0))
    }
}

impl Default for LivenessTtl {
    fn default() -> Self {
        Self(DEFAULT_TTL_SECONDS)
    }
}

/// Liveness registration for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistration {
    agent_id: AgentId,
    status: RegistrationStatus,
    ttl: LivenessTtl,
    metadata: BTreeMap<String, String>,
    registered_at: DateTime<Utc>,
    last_heartbeat_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRegistrationData {
    /// Persisted agent identifier.
    pub agent_id: AgentId,
    /// Persisted lifecycle status.
    pub status: RegistrationStatus,
    /// Persisted liveness TTL.
    pub ttl: LivenessTtl,
    /// Persisted free-form metadata.
    pub metadata: BTreeMap<String, String>,
    /// Persisted registration timestamp.
    pub registered_at: DateTime<Utc>,
    /// Persisted latest heartbeat timestamp.
    pub last_heartbeat_at: DateTime<Utc>,
    /// Persisted liveness marker deadline.
    pub expires_at: DateTime<Utc>,
}

impl AgentRegistration {
    /// Creates an `Active` registration whose marker runs for `ttl` from now.
    #[must_use]
    pub fn new(
        agent_id: AgentId,
        ttl: LivenessTtl,
        metadata: BTreeMap<String, String>,
        clock: &impl Clock,
    ) -> Self {
        let now = clock.utc();
        Self {
            agent_id,
            status: RegistrationStatus::Active,
            ttl,
            metadata,
            registered_at: now,
            last_heartbeat_at: now,
            expires_at: ttl.deadline_from(now),
        }
    }

    /// Reconstructs a registration from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedRegistrationData) -> Self {
        Self {
            agent_id: data.agent_id,
            status: data.status,
            ttl: data.ttl,
            metadata: data.metadata,
            registered_at: data.registered_at,
            last_heartbeat_at: data.last_heartbeat_at,
            expires_at: data.expires_at,
        }
    }

    /// Returns the agent identifier.
    #[must_use]
    pub const fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Returns the stored lifecycle status.
    ///
    /// This does not account for a lapsed marker; see
    /// [`Self::effective_status`].
    #[must_use]
    pub const fn status(&self) -> RegistrationStatus {
        self.status
    }

    /// Returns the liveness TTL.
    #[must_use]
    pub const fn ttl(&self) -> LivenessTtl {
        self.ttl
    }

    /// Returns the registration metadata.
    #[must_use]
    pub const fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Returns the registration timestamp.
    #[must_use]
    pub const fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Returns the latest heartbeat timestamp.
    #[must_use]
    pub const fn last_heartbeat_at(&self) -> DateTime<Utc> {
        self.last_heartbeat_at
    }

    /// Returns the instant the liveness marker lapses.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns the status as observed at `now`, reporting `Expired` for an
    /// `Active` registration whose marker has lapsed.
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> RegistrationStatus {
        match self.status {
            RegistrationStatus::Active if now >= self.expires_at => RegistrationStatus::Expired,
            other => other,
        }
    }

    /// Returns `true` iff the registration is active and its marker has not
    /// lapsed at `now`.
    #[must_use]
    pub fn is_alive(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == RegistrationStatus::Active
    }

    /// Returns a copy whose stored status reflects lazy expiry at `now`.
    #[must_use]
    pub fn observed_at(mut self, now: DateTime<Utc>) -> Self {
        self.status = self.effective_status(now);
        self
    }

    /// Records a heartbeat: renews the marker and reactivates the agent.
    pub fn heartbeat(&mut self, clock: &impl Clock) {
        self.heartbeat_at(clock.utc());
    }

    /// Records a heartbeat observed at `now`.
    pub fn heartbeat_at(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat_at = now;
        self.expires_at = self.ttl.deadline_from(now);
        self.status = RegistrationStatus::Active;
    }

    /// Marks the registration as explicitly deregistered and drops the
    /// marker.
    pub fn deregister(&mut self, clock: &impl Clock) {
        self.deregister_at(clock.utc());
    }

    /// Marks the registration as deregistered at `now`.
    pub const fn deregister_at(&mut self, now: DateTime<Utc>) {
        self.status = RegistrationStatus::Deregistered;
        self.expires_at = now;
    }

    /// Persists lazy expiry into the stored status.
    pub const fn mark_expired(&mut self) {
        if matches!(self.status, RegistrationStatus::Active) {
            self.status = RegistrationStatus::Expired;
        }
    }
}
