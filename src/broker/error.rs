//! Structured error types for the broker.
//!
//! Only the two hard-error kinds that §7/§9 says are raised to the caller
//! (rather than surfaced as a boolean/`Option`/dead-letter entry) appear
//! here, following the structured-field style of `RouterError` rather than
//! a flat-string error enum.

use thiserror::Error;

use super::domain_types::AgentId;

/// Errors returned directly to a caller of the broker API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// `subscribe` was called for an agent that is not registered.
    #[error("cannot subscribe unknown agent: {agent_id}")]
    UnknownAgent {
        /// The unregistered agent id.
        agent_id: AgentId,
    },

    /// `send_request` was called with a message whose `message_type` is not
    /// `REQUEST`.
    #[error("send_request requires a REQUEST message")]
    InvalidMessageType,

    /// An operation was attempted after the broker had already stopped.
    #[error("broker is not running")]
    NotRunning,
}
