//! Adapter implementations for coordinator ports.

pub mod gates;
pub mod memory;
pub mod postgres;
