//! Shared-store plumbing used by every bounded context.
//!
//! The coordination substrate keeps no authoritative state in process memory.
//! Every agent registration, mailbox and circuit lives in a shared store that
//! independent processes reach over the network. This module holds the pieces
//! the per-context adapters have in common:
//!
//! - [`KeyNamespace`]: isolates deployments that share one store
//! - [`StoreRetryPolicy`] and [`retry_transient`]: bounded exponential retry
//!   of transient store faults, with [`retry_transient_or_resolve`] for
//!   mutations whose replay the store refuses
//! - [`postgres`]: connection pooling, the blocking bridge and the schema

mod namespace;
pub mod postgres;
mod retry;

pub use namespace::{DEFAULT_NAMESPACE, KeyNamespace, NamespaceError};
pub(crate) use retry::exponential_delay;
pub use retry::{StoreFault, StoreRetryPolicy, retry_transient, retry_transient_or_resolve};
