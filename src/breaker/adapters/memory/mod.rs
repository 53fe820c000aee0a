//! In-memory adapters for circuit state.

mod circuit_store;

pub use circuit_store::InMemoryCircuitStore;
