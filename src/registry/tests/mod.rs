//! Unit tests for the agent registry.

mod service_tests;
