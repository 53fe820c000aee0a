//! Service layer for message delivery.

mod coordinator;

pub use coordinator::{
    CoordinatorServiceError, CoordinatorServiceResult, CoordinatorSettings,
    DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_MAX_RETRIES, DEFAULT_SETTLED_RETENTION,
    MessageCoordinator, SendReceipt, SweepReport,
};
