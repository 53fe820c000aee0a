//! Port contracts for message delivery.

mod gates;
mod mailbox;

#[cfg(test)]
pub use gates::{MockAgentLiveness, MockRouteHealth};
pub use gates::{AgentLiveness, GateError, RouteGrant, RouteHealth};
#[cfg(test)]
pub use mailbox::MockMailboxRepository;
pub use mailbox::{
    FailedDelivery, LeaseRequest, MailboxDepth, MailboxError, MailboxRepository, MailboxResult,
};
