//! Circuit state and its transition rules.
//!
//! Transitions are pure functions of the current state, the policy and the
//! observed instant. Open becomes HalfOpen lazily on the next access once the
//! cooldown has elapsed; there is no timer.

use super::{BreakerPolicy, CircuitPhase, CircuitSubject};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shared breaker state for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitState {
    subject: CircuitSubject,
    phase: CircuitPhase,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<DateTime<Utc>>,
    cooldown_seconds: u32,
    trip_count: u32,
    probes_in_flight: u32,
    probe_started_at: Option<DateTime<Utc>>,
    version: u64,
}

/// Parameter object for reconstructing a persisted circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedCircuitData {
    /// Persisted subject.
    pub subject: CircuitSubject,
    /// Persisted phase.
    pub phase: CircuitPhase,
    /// Persisted consecutive failure count.
    pub consecutive_failures: u32,
    /// Persisted consecutive success count.
    pub consecutive_successes: u32,
    /// Persisted instant of the latest trip.
    pub opened_at: Option<DateTime<Utc>>,
    /// Persisted current cooldown in seconds.
    pub cooldown_seconds: u32,
    /// Persisted number of trips since creation.
    pub trip_count: u32,
    /// Persisted number of outstanding probes.
    pub probes_in_flight: u32,
    /// Persisted instant the latest probe was admitted.
    pub probe_started_at: Option<DateTime<Utc>>,
    /// Persisted compare-and-swap version.
    pub version: u64,
}

/// Whether a call would currently be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The circuit is closed.
    Pass,
    /// The circuit is half-open and a probe slot is free.
    Probe,
    /// The circuit rejects calls for at least `retry_after`.
    Reject {
        /// Time until the circuit may admit a call again.
        retry_after: Duration,
    },
}

impl Admission {
    /// Returns `true` unless the admission is a rejection.
    #[must_use]
    pub const fn is_admitted(self) -> bool {
        !matches!(self, Self::Reject { .. })
    }
}

/// Kind of slot granted by [`CircuitState::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePermit {
    /// A normal call through a closed circuit.
    Normal,
    /// A probe call through a half-open circuit.
    Probe,
}

impl CircuitState {
    /// Creates the implicit initial state: closed with zeroed counters.
    #[must_use]
    pub const fn closed(subject: CircuitSubject, policy: &BreakerPolicy) -> Self {
        Self {
            subject,
            phase: CircuitPhase::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            cooldown_seconds: policy.cooldown_seconds,
            trip_count: 0,
            probes_in_flight: 0,
            probe_started_at: None,
            version: 0,
        }
    }

    /// Reconstructs a circuit from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedCircuitData) -> Self {
        Self {
            subject: data.subject,
            phase: data.phase,
            consecutive_failures: data.consecutive_failures,
            consecutive_successes: data.consecutive_successes,
            opened_at: data.opened_at,
            cooldown_seconds: data.cooldown_seconds,
            trip_count: data.trip_count,
            probes_in_flight: data.probes_in_flight,
            probe_started_at: data.probe_started_at,
            version: data.version,
        }
    }

    /// Returns the subject.
    #[must_use]
    pub const fn subject(&self) -> &CircuitSubject {
        &self.subject
    }

    /// Returns the phase.
    #[must_use]
    pub const fn phase(&self) -> CircuitPhase {
        self.phase
    }

    /// Returns the consecutive failure count.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Returns the consecutive success count.
    #[must_use]
    pub const fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    /// Returns the instant of the latest trip.
    #[must_use]
    pub const fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    /// Returns the current cooldown in seconds.
    #[must_use]
    pub const fn cooldown_seconds(&self) -> u32 {
        self.cooldown_seconds
    }

    /// Returns how many times the circuit has tripped.
    #[must_use]
    pub const fn trip_count(&self) -> u32 {
        self.trip_count
    }

    /// Returns the number of outstanding probes.
    #[must_use]
    pub const fn probes_in_flight(&self) -> u32 {
        self.probes_in_flight
    }

    /// Returns the instant the latest probe was admitted.
    #[must_use]
    pub const fn probe_started_at(&self) -> Option<DateTime<Utc>> {
        self.probe_started_at
    }

    /// Returns the compare-and-swap version; `0` means never persisted.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns the state that must be written in place of this one.
    ///
    /// The version is advanced so that a concurrent writer holding the old
    /// version loses the compare-and-swap.
    #[must_use]
    pub(crate) const fn next_version(mut self) -> Self {
        self.version = self.version.saturating_add(1);
        self
    }

    /// Applies time-driven changes observed at `now`.
    ///
    /// Moves Open to HalfOpen once the cooldown has elapsed and reclaims
    /// probe slots held longer than the cooldown. Returns `true` when the
    /// state changed.
    pub fn resolve(&mut self, now: DateTime<Utc>) -> bool {
        match self.phase {
            CircuitPhase::Open if self.cooldown_elapsed(self.opened_at, now) => {
                self.phase = CircuitPhase::HalfOpen;
                self.consecutive_successes = 0;
                self.probes_in_flight = 0;
                self.probe_started_at = None;
                true
            }
            CircuitPhase::HalfOpen
                if self.probes_in_flight > 0
                    && self.cooldown_elapsed(self.probe_started_at, now) =>
            {
                self.probes_in_flight = 0;
                self.probe_started_at = None;
                true
            }
            _ => false,
        }
    }

    /// Reports whether a call would be admitted at `now` without taking a
    /// probe slot. Call [`Self::resolve`] first.
    #[must_use]
    pub fn admission(&self, now: DateTime<Utc>, policy: &BreakerPolicy) -> Admission {
        match self.phase {
            CircuitPhase::Closed => Admission::Pass,
            CircuitPhase::HalfOpen if self.probes_in_flight < policy.half_open_max_probes => {
                Admission::Probe
            }
            CircuitPhase::HalfOpen => Admission::Reject {
                retry_after: self.remaining_cooldown(self.probe_started_at, now),
            },
            CircuitPhase::Open => Admission::Reject {
                retry_after: self.remaining_cooldown(self.opened_at, now),
            },
        }
    }

    /// Takes a call slot at `now`, consuming a probe slot when half-open.
    ///
    /// # Errors
    ///
    /// Returns the time until the circuit may admit again when the call is
    /// rejected.
    pub fn acquire(
        &mut self,
        now: DateTime<Utc>,
        policy: &BreakerPolicy,
    ) -> Result<ProbePermit, Duration> {
        self.resolve(now);
        match self.admission(now, policy) {
            Admission::Pass => Ok(ProbePermit::Normal),
            Admission::Probe => {
                self.probes_in_flight = self.probes_in_flight.saturating_add(1);
                self.probe_started_at = Some(now);
                Ok(ProbePermit::Probe)
            }
            Admission::Reject { retry_after } => Err(retry_after),
        }
    }

    /// Hands back a half-open slot taken by [`Self::acquire`] whose call
    /// never ran. Nothing is counted as a success or a failure.
    pub fn release_slot(&mut self, now: DateTime<Utc>) {
        self.resolve(now);
        if self.phase == CircuitPhase::HalfOpen && self.probes_in_flight > 0 {
            self.probes_in_flight = self.probes_in_flight.saturating_sub(1);
            if self.probes_in_flight == 0 {
                self.probe_started_at = None;
            }
        }
    }

    /// Records a successful call observed at `now`.
    ///
    /// A success while Open belongs to a call admitted before the trip and
    /// leaves the state untouched.
    pub fn record_success(&mut self, now: DateTime<Utc>, policy: &BreakerPolicy) {
        self.resolve(now);
        match self.phase {
            CircuitPhase::Closed => {
                self.consecutive_failures = 0;
                self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            }
            CircuitPhase::HalfOpen => {
                self.probes_in_flight = self.probes_in_flight.saturating_sub(1);
                self.consecutive_successes = self.consecutive_successes.saturating_add(1);
                if self.consecutive_successes >= policy.success_threshold {
                    self.close(policy);
                }
            }
            CircuitPhase::Open => {}
        }
    }

    /// Records a failed call observed at `now`.
    pub fn record_failure(&mut self, now: DateTime<Utc>, policy: &BreakerPolicy) {
        self.resolve(now);
        self.consecutive_successes = 0;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.phase {
            CircuitPhase::Closed if self.consecutive_failures >= policy.failure_threshold => {
                self.trip(now);
            }
            CircuitPhase::HalfOpen => {
                self.cooldown_seconds = policy.escalate_cooldown(self.cooldown_seconds);
                self.trip(now);
            }
            CircuitPhase::Closed | CircuitPhase::Open => {}
        }
    }

    fn trip(&mut self, now: DateTime<Utc>) {
        self.phase = CircuitPhase::Open;
        self.opened_at = Some(now);
        self.trip_count = self.trip_count.saturating_add(1);
        self.probes_in_flight = 0;
        self.probe_started_at = None;
    }

    fn close(&mut self, policy: &BreakerPolicy) {
        self.phase = CircuitPhase::Closed;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.opened_at = None;
        self.cooldown_seconds = policy.cooldown_seconds;
        self.probes_in_flight = 0;
        self.probe_started_at = None;
    }

    fn cooldown(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.cooldown_seconds))
    }

    fn cooldown_elapsed(&self, since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        since.is_none_or(|start| now >= start + self.cooldown())
    }

    fn remaining_cooldown(&self, since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        since
            .map(|start| start + self.cooldown() - now)
            .and_then(|remaining| remaining.to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}
