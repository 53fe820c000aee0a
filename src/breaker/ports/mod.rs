//! Port contracts for shared circuit state.

mod repository;

#[cfg(test)]
pub use repository::MockCircuitStateRepository;
pub use repository::{CasOutcome, CircuitStateRepository, CircuitStoreError, CircuitStoreResult};
