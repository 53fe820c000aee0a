//! `PostgreSQL` adapters for circuit state.

mod models;
mod repository;
mod schema;

pub use repository::PostgresCircuitStore;
