//! In-memory adapters for the agent registry.

mod registration_store;

pub use registration_store::InMemoryAgentRegistry;
