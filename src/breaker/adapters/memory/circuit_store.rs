//! In-memory circuit state store with version-checked writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::breaker::{
    domain::{CircuitState, CircuitSubject},
    ports::{CasOutcome, CircuitStateRepository, CircuitStoreError, CircuitStoreResult},
};
use crate::store::KeyNamespace;

/// Thread-safe in-memory circuit state repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCircuitStore {
    namespace: KeyNamespace,
    state: Arc<RwLock<HashMap<(KeyNamespace, String), CircuitState>>>,
}

impl InMemoryCircuitStore {
    /// Creates an empty store in the default namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle onto the same backing state scoped to `namespace`.
    #[must_use]
    pub fn for_namespace(&self, namespace: KeyNamespace) -> Self {
        Self {
            namespace,
            state: Arc::clone(&self.state),
        }
    }

    fn key(&self, subject: &CircuitSubject) -> (KeyNamespace, String) {
        (self.namespace.clone(), subject.key())
    }
}

#[async_trait]
impl CircuitStateRepository for InMemoryCircuitStore {
    async fn load(&self, subject: &CircuitSubject) -> CircuitStoreResult<Option<CircuitState>> {
        let state = self.state.read().map_err(|err| {
            CircuitStoreError::persistence(std::io::Error::other(err.to_string()))
        })?;
        Ok(state.get(&self.key(subject)).cloned())
    }

    async fn compare_and_swap(
        &self,
        expected_version: Option<u64>,
        circuit: &CircuitState,
        _now: DateTime<Utc>,
    ) -> CircuitStoreResult<CasOutcome> {
        let mut state = self.state.write().map_err(|err| {
            CircuitStoreError::persistence(std::io::Error::other(err.to_string()))
        })?;
        let key = self.key(circuit.subject());
        let stored_version = state.get(&key).map(CircuitState::version);
        if stored_version != expected_version {
            return Ok(CasOutcome::Conflict);
        }
        state.insert(key, circuit.clone());
        Ok(CasOutcome::Applied)
    }
}
