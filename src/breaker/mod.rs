//! Circuit breaker shared across processes.
//!
//! Each [`domain::CircuitSubject`] (an agent or a sender/recipient route) has
//! one [`domain::CircuitState`] in the shared store. Every transition is a
//! compare-and-swap on the state's version, so concurrent processes observing
//! the same borderline counter cannot both apply conflicting transitions.
//!
//! - Domain types and the pure state machine in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
