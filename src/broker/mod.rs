//! The agent message broker: priority-ordered queueing, a multi-worker
//! dispatch pool, agent and subscription registries, request/response
//! correlation, and retry/dead-letter handling.
//!
//! See [`Broker`] for the public entry point; agents typically reach it
//! indirectly through [`crate::mixin::CommunicationMixin`] instead of using
//! this API directly.

pub mod broker;
pub mod config;
pub mod correlator;
pub mod dead_letter;
pub mod delivery;
pub mod domain_types;
pub mod error;
pub mod handler;
pub mod message;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod subscriptions;
pub mod worker_pool;

pub use broker::Broker;
pub use config::{BrokerConfig, BrokerConfigBuilder, ConfigError};
pub use dead_letter::{DeadLetterEntry, DeadLetterReason};
pub use error::BrokerError;
pub use handler::Handler;
pub use message::{AgentIdentity, Message, MessageMetadata, MessagePriority, MessageType, Payload};
pub use stats::BrokerStats;
