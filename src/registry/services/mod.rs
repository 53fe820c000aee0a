//! Service layer for agent liveness registration.

mod registry;

pub use registry::{
    AgentRegistryService, AgentRegistryServiceError, AgentRegistryServiceResult, DEFAULT_PAGE_SIZE,
    RegistrySettings,
};
