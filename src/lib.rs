//! Switchyard: a coordination substrate for multi-agent systems.
//!
//! Independent agent processes share three primitives:
//!
//! - [`registry`]: agent registration with heartbeat-driven liveness
//! - [`coordinator`]: durable per-agent mailboxes with priority ordering,
//!   leases, retry with backoff and dead-lettering
//! - [`breaker`]: shared circuit breakers gating calls to a subject
//!
//! All authoritative state lives in a shared store reached through the
//! [`store`] plumbing, so any number of processes can run the services side
//! by side. Each context follows the same hexagonal layout:
//!
//! - **Domain**: pure state machines and value types
//! - **Ports**: async traits over the shared store
//! - **Adapters**: in-memory and `PostgreSQL` implementations of the ports
//! - **Services**: orchestration with retry, gating and logging
//!
//! [`sweeper`] runs the periodic lease-expiry and reaping passes. Settings
//! come from [`config`]; [`telemetry`] installs the log subscriber.

pub mod breaker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod registry;
pub mod store;
pub mod sweeper;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use error::ErrorKind;
