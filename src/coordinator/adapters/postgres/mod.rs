//! `PostgreSQL` adapters for mailboxes and dead letters.

mod models;
mod repository;
mod schema;

pub use repository::PostgresMailboxStore;
