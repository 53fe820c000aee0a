//! Agent liveness registry.
//!
//! Tracks which agents are alive through heartbeats that renew an expiring
//! liveness marker in the shared store. Registrations are created by
//! `register`, renewed by `heartbeat`, and removed from liveness by
//! `deregister` or by the marker lapsing. The module follows hexagonal
//! architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
