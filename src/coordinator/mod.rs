//! Message coordinator: priority mailboxes with leases, retries, and
//! dead-lettering.
//!
//! Senders enqueue into the recipient's mailbox. Receivers lease batches in
//! strict priority order (FIFO within a priority). An unacknowledged lease
//! lapses and the message is retried with exponential backoff until it
//! exhausts its retries and lands in the dead-letter collection exactly once.
//! Delivery is at-least-once.
//!
//! Delivery is gated by the agent registry (is the receiver alive?) and the
//! circuit breaker (is the route healthy?), both consulted through ports.
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
