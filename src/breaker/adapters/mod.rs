//! Adapter implementations for breaker ports.

pub mod memory;
pub mod postgres;
