//! In-memory adapters for mailboxes.

mod mailbox_store;

pub use mailbox_store::InMemoryMailboxStore;
