//! Unit tests for the circuit breaker.
