//! Domain model for message delivery.

mod backoff;
mod dead_letter;
mod error;
mod ids;
mod message;
mod priority;
mod route;
mod status;

pub use backoff::RetryBackoff;
pub use dead_letter::DeadLetterEntry;
pub use error::{CoordinatorDomainError, LeaseViolation, ParseMessageStatusError};
pub use ids::{LeaseToken, MessageId};
pub use message::{
    LEASE_EXPIRED_REASON, Lease, Message, NewMessage, PersistedMessageData, RetryDecision,
};
pub use priority::Priority;
pub use route::{RouteBlock, RouteScope, RouteStatus};
pub use status::MessageStatus;
