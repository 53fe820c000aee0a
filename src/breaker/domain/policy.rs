//! Breaker thresholds and per-subject overrides.

use super::{BreakerDomainError, CircuitSubject};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Thresholds governing one circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerPolicy {
    /// Consecutive failures that trip a closed circuit (`F`).
    pub failure_threshold: u32,
    /// Consecutive probe successes that close a half-open circuit (`S`).
    pub success_threshold: u32,
    /// Cooldown after the first trip, in seconds.
    pub cooldown_seconds: u32,
    /// Upper bound for the cooldown after repeated trips, in seconds.
    pub max_cooldown_seconds: u32,
    /// Factor applied to the cooldown each time a probe fails.
    pub cooldown_multiplier: u32,
    /// Probe calls admitted concurrently while half-open.
    pub half_open_max_probes: u32,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown_seconds: 30,
            max_cooldown_seconds: 300,
            cooldown_multiplier: 2,
            half_open_max_probes: 1,
        }
    }
}

impl BreakerPolicy {
    /// Checks that the policy describes a usable state machine.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerDomainError`] when a threshold is zero or the
    /// cooldown ceiling is below the base cooldown.
    pub const fn validate(self) -> Result<Self, BreakerDomainError> {
        if self.failure_threshold == 0 {
            return Err(BreakerDomainError::ZeroLimit {
                field: "failure_threshold",
            });
        }
        if self.success_threshold == 0 {
            return Err(BreakerDomainError::ZeroLimit {
                field: "success_threshold",
            });
        }
        if self.half_open_max_probes == 0 {
            return Err(BreakerDomainError::ZeroLimit {
                field: "half_open_max_probes",
            });
        }
        if self.cooldown_multiplier == 0 {
            return Err(BreakerDomainError::ZeroLimit {
                field: "cooldown_multiplier",
            });
        }
        if self.max_cooldown_seconds < self.cooldown_seconds {
            return Err(BreakerDomainError::CooldownCeilingTooLow {
                cooldown_seconds: self.cooldown_seconds,
                max_seconds: self.max_cooldown_seconds,
            });
        }
        Ok(self)
    }

    /// Returns the cooldown that follows `current` after a failed probe.
    #[must_use]
    pub const fn escalate_cooldown(&self, current: u32) -> u32 {
        let grown = current.saturating_mul(self.cooldown_multiplier);
        if grown > self.max_cooldown_seconds {
            self.max_cooldown_seconds
        } else {
            grown
        }
    }
}

/// Default policy plus overrides keyed by [`CircuitSubject::key`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakerPolicies {
    default: BreakerPolicy,
    overrides: BTreeMap<String, BreakerPolicy>,
}

impl BreakerPolicies {
    /// Creates a policy set with no overrides.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerDomainError`] when `default` is invalid.
    pub const fn new(default: BreakerPolicy) -> Result<Self, BreakerDomainError> {
        match default.validate() {
            Ok(valid) => Ok(Self {
                default: valid,
                overrides: BTreeMap::new(),
            }),
            Err(err) => Err(err),
        }
    }

    /// Adds an override for one subject.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerDomainError`] when `policy` is invalid.
    pub fn with_override(
        mut self,
        subject: &CircuitSubject,
        policy: BreakerPolicy,
    ) -> Result<Self, BreakerDomainError> {
        self.overrides.insert(subject.key(), policy.validate()?);
        Ok(self)
    }

    /// Adds an override for a raw subject key as found in configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerDomainError`] when `policy` is invalid.
    pub fn with_key_override(
        mut self,
        subject_key: impl Into<String>,
        policy: BreakerPolicy,
    ) -> Result<Self, BreakerDomainError> {
        self.overrides.insert(subject_key.into(), policy.validate()?);
        Ok(self)
    }

    /// Returns the policy in force for `subject`.
    #[must_use]
    pub fn for_subject(&self, subject: &CircuitSubject) -> &BreakerPolicy {
        self.overrides.get(&subject.key()).unwrap_or(&self.default)
    }

    /// Returns the default policy.
    #[must_use]
    pub const fn default_policy(&self) -> &BreakerPolicy {
        &self.default
    }
}
