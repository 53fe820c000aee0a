//! Domain model for circuit breaking.

mod error;
mod phase;
mod policy;
mod state;
mod subject;

pub use error::{BreakerDomainError, ParseCircuitPhaseError};
pub use phase::CircuitPhase;
pub use policy::{BreakerPolicies, BreakerPolicy};
pub use state::{Admission, CircuitState, PersistedCircuitData, ProbePermit};
pub use subject::CircuitSubject;
