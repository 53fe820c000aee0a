//! Unit tests for the message coordinator.
