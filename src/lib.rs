//! An in-process agent message broker.
//!
//! Agents register with a [`broker::Broker`] and exchange priority-ordered
//! messages through it — requests correlated to their responses, events fanned
//! out to topic subscribers, broadcasts reaching every registered agent — while
//! a pool of workers drains the queue, retrying failed HIGH/CRITICAL deliveries
//! and dead-lettering the rest.
//!
//! Agents typically reach the broker through [`mixin::CommunicationMixin`]
//! rather than calling [`broker::Broker`] directly.

pub mod broker;
pub mod mixin;
pub mod time_provider;

pub use broker::{
    AgentIdentity, Broker, BrokerConfig, BrokerConfigBuilder, BrokerError, BrokerStats,
    ConfigError, DeadLetterEntry, DeadLetterReason, Handler, Message, MessageMetadata,
    MessagePriority, MessageType, Payload,
};
pub use mixin::CommunicationMixin;
