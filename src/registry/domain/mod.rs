//! Domain model for agent identity and liveness registration.
//!
//! [`AgentId`] is the identity every other context keys on. Registrations
//! carry the liveness marker deadline so that expiry can be evaluated lazily
//! against any clock without a background timer.

mod error;
mod ids;
mod registration;
mod status;

pub use error::{ParseRegistrationStatusError, RegistryDomainError};
pub use ids::AgentId;
pub(crate) use ids::validate_type_filter;
pub use registration::{
    AgentRegistration, DEFAULT_TTL_SECONDS, LivenessTtl, PersistedRegistrationData,
};
pub use status::RegistrationStatus;
