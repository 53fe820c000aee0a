//! Port contracts for agent liveness registration.

mod repository;

#[cfg(test)]
pub use repository::MockAgentRegistryRepository;
pub use repository::{
    AgentRegistryError, AgentRegistryRepository, AgentRegistryResult, RegistrationPageQuery,
};
