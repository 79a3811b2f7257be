//! The message model: identity, message types, priority, metadata, and the
//! message envelope itself, plus the factory functions §4.1 requires.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::domain_types::{AgentId, AgentType, Capability, AgentName, MessageId, MessageTimestamp, RetryCount, TtlSeconds};

/// Opaque structured payload carried by a message.
///
/// A nested map of scalars, lists, and maps, exactly as §3 describes; we use
/// `serde_json::Value` because it is already the self-describing structured
/// form the rest of the ambient stack serialises with.
pub type Payload = serde_json::Value;

/// Stable identity of an agent, held by reference in the registry until the
/// agent unregisters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Stable, caller-chosen identifier.
    pub agent_id: AgentId,
    /// Category tag, e.g. `"legal"`.
    pub agent_type: AgentType,
    /// Human-readable name.
    pub name: AgentName,
    /// Capability tags advertised by the agent.
    pub capabilities: HashSet<Capability>,
}

impl AgentIdentity {
    /// Builds a new identity. Capabilities may be empty.
    #[must_use]
    pub fn new(
        agent_id: AgentId,
        agent_type: AgentType,
        name: AgentName,
        capabilities: HashSet<Capability>,
    ) -> Self {
        Self {
            agent_id,
            agent_type,
            name,
            capabilities,
        }
    }
}

/// Closed enumeration of message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Expects a RESPONSE, tracked by the request correlator.
    Request,
    /// Answers a prior REQUEST, carrying its `correlation_id`.
    Response,
    /// Fire-and-forget notification, typically published to topic subscribers.
    Event,
    /// Delivered to every registered agent (empty `recipients`).
    Broadcast,
    /// Shares RAG/analysis context between agents.
    ContextShare,
    /// Informational status notification.
    StatusUpdate,
    /// Carries an error description.
    Error,
}

/// Ordered dispatch priority. Higher weight dispatches earlier; the
/// `#[derive(PartialOrd, Ord)]` on the explicit discriminants gives us the
/// ordering directly, the way `message_router`'s `MessagePriority` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessagePriority {
    /// Lowest priority; may starve under sustained HIGH/CRITICAL load.
    Low = 1,
    /// Default priority for ordinary traffic.
    Normal = 5,
    /// Preempts NORMAL/LOW; eligible for retry on handler failure.
    High = 8,
    /// Preempts everything else; eligible for retry on handler failure.
    Critical = 10,
}

impl Default for MessagePriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl MessagePriority {
    /// Integer weight used by the priority queue's ordering.
    #[must_use]
    pub fn weight(self) -> u8 {
        self as u8
    }

    /// Whether a failed delivery at this priority is eligible for retry
    /// (§4.6 step 3d: `priority >= HIGH`).
    #[must_use]
    pub fn retry_eligible(self) -> bool {
        self >= Self::High
    }
}

/// Routing and tracking metadata carried alongside a message's payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Unique per message; doubles as the REQUEST's own correlation id.
    pub message_id: MessageId,
    /// Shared by a REQUEST/RESPONSE pair; equals the REQUEST's `message_id`.
    pub correlation_id: MessageId,
    /// When the message was constructed.
    pub created_at: MessageTimestamp,
    /// Time-to-live, checked only at dequeue (§5).
    pub ttl_seconds: TtlSeconds,
    /// Dispatch priority.
    pub priority: MessagePriority,
    /// Mutable retry counter, bounded by `retry_max_attempts`.
    pub retry_count: RetryCount,
}

impl MessageMetadata {
    /// Builds fresh metadata for a newly-constructed message whose
    /// `correlation_id` is its own `message_id` (the common case for
    /// everything except a RESPONSE).
    #[must_use]
    pub fn new(priority: MessagePriority, ttl_seconds: TtlSeconds) -> Self {
        let message_id = MessageId::generate();
        Self {
            message_id,
            correlation_id: message_id,
            created_at: MessageTimestamp::now(),
            ttl_seconds,
            priority,
            retry_count: RetryCount::default(),
        }
    }

    /// Whether the message has outlived its TTL, per §3's invariant
    /// `is_expired() ⇔ now − created_at > ttl_seconds`.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        MessageTimestamp::now().elapsed_since(self.created_at) > u64::from(self.ttl_seconds)
    }
}

/// A single message routed through the broker.
///
/// Immutable except for `metadata.retry_count`, which the delivery engine
/// bumps in place on retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Identity of the sending agent.
    pub sender: AgentIdentity,
    /// Ordered recipient list; empty means broadcast to all registered agents.
    pub recipients: Vec<AgentId>,
    /// Kind of message.
    pub message_type: MessageType,
    /// Opaque structured payload.
    pub payload: Payload,
    /// Routing/tracking metadata.
    pub metadata: MessageMetadata,
}

impl Message {
    /// `is_request() = message_type == REQUEST` (§9 open question resolution).
    #[must_use]
    pub fn is_request(&self) -> bool {
        self.message_type == MessageType::Request
    }

    /// `is_response() = message_type == RESPONSE`.
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.message_type == MessageType::Response
    }

    /// `is_broadcast() = recipients.is_empty()`.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.recipients.is_empty()
    }

    /// Whether the message has outlived its TTL.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.metadata.is_expired()
    }

    /// Generic constructor for a caller-chosen `message_type`, used by the
    /// mixin's `send_message` where the type is a parameter rather than
    /// fixed by the call site (§4.9).
    #[must_use]
    pub fn new(
        sender: AgentIdentity,
        recipients: Vec<AgentId>,
        message_type: MessageType,
        payload: Payload,
        priority: MessagePriority,
        ttl_seconds: TtlSeconds,
    ) -> Self {
        Self {
            sender,
            recipients,
            message_type,
            payload,
            metadata: MessageMetadata::new(priority, ttl_seconds),
        }
    }

    /// §4.1 factory rule: a REQUEST's `correlation_id` is set to its own
    /// `message_id`.
    #[must_use]
    pub fn new_request(
        sender: AgentIdentity,
        recipients: Vec<AgentId>,
        payload: Payload,
        priority: MessagePriority,
        ttl_seconds: TtlSeconds,
    ) -> Self {
        Self {
            sender,
            recipients,
            message_type: MessageType::Request,
            payload,
            metadata: MessageMetadata::new(priority, ttl_seconds),
        }
    }

    /// §4.1 factory rule: a RESPONSE created from a REQUEST copies the
    /// REQUEST's `correlation_id` and targets the REQUEST's sender as sole
    /// recipient.
    #[must_use]
    pub fn create_response(&self, sender: AgentIdentity, payload: Payload) -> Self {
        let mut metadata = MessageMetadata::new(self.metadata.priority, self.metadata.ttl_seconds);
        metadata.correlation_id = self.metadata.correlation_id;
        Self {
            sender,
            recipients: vec![self.sender.agent_id.clone()],
            message_type: MessageType::Response,
            payload,
            metadata,
        }
    }

    /// §4.1 factory rule: a BROADCAST has empty `recipients`.
    #[must_use]
    pub fn new_broadcast(sender: AgentIdentity, payload: Payload, priority: MessagePriority, ttl_seconds: TtlSeconds) -> Self {
        Self {
            sender,
            recipients: Vec::new(),
            message_type: MessageType::Broadcast,
            payload,
            metadata: MessageMetadata::new(priority, ttl_seconds),
        }
    }

    /// Builds an EVENT message shaped `{"topic": ..., "data": ...}`, as
    /// published to a topic's subscribers.
    #[must_use]
    pub fn new_event(
        sender: AgentIdentity,
        recipients: Vec<AgentId>,
        topic: &str,
        data: Payload,
        priority: MessagePriority,
    ) -> Self {
        Self {
            sender,
            recipients,
            message_type: MessageType::Event,
            payload: serde_json::json!({ "topic": topic, "data": data }),
            metadata: MessageMetadata::new(priority, TtlSeconds::default()),
        }
    }

    /// §4.1 factory rule: a CONTEXT_SHARE payload carries `context_type` and
    /// `context_data` keys.
    #[must_use]
    pub fn new_context_share(
        sender: AgentIdentity,
        recipient: AgentId,
        context_type: &str,
        context_data: Payload,
        priority: MessagePriority,
    ) -> Self {
        Self {
            sender,
            recipients: vec![recipient],
            message_type: MessageType::ContextShare,
            payload: serde_json::json!({ "context_type": context_type, "context_data": context_data }),
            metadata: MessageMetadata::new(priority, TtlSeconds::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn identity(id: &str) -> AgentIdentity {
        AgentIdentity::new(
            AgentId::try_new(id).unwrap(),
            AgentType::try_new("test").unwrap(),
            AgentName::try_new(id).unwrap(),
            HashSet::new(),
        )
    }

    #[test]
    fn request_correlation_id_equals_its_own_message_id() {
        let msg = Message::new_request(
            identity("a"),
            vec![AgentId::try_new("b").unwrap()],
            serde_json::json!({}),
            MessagePriority::Normal,
            TtlSeconds::default(),
        );
        assert_eq!(msg.metadata.correlation_id, msg.metadata.message_id);
        assert!(msg.is_request());
    }

    #[test]
    fn response_targets_request_sender_and_copies_correlation_id() {
        let request = Message::new_request(
            identity("a"),
            vec![AgentId::try_new("b").unwrap()],
            serde_json::json!({}),
            MessagePriority::Normal,
            TtlSeconds::default(),
        );
        let response = request.create_response(identity("b"), serde_json::json!({"ok": true}));
        assert_eq!(response.recipients, vec![AgentId::try_new("a").unwrap()]);
        assert_eq!(response.metadata.correlation_id, request.metadata.message_id);
        assert!(response.is_response());
    }

    #[test]
    fn broadcast_has_empty_recipients() {
        let msg = Message::new_broadcast(identity("a"), serde_json::json!({}), MessagePriority::High, TtlSeconds::default());
        assert!(msg.is_broadcast());
    }

    #[test]
    fn event_payload_carries_topic_and_data() {
        let msg = Message::new_event(
            identity("a"),
            vec![AgentId::try_new("b").unwrap()],
            "rag_updates",
            serde_json::json!({"u": 1}),
            MessagePriority::Normal,
        );
        assert_eq!(msg.payload["topic"], "rag_updates");
        assert_eq!(msg.payload["data"]["u"], 1);
    }

    #[test]
    fn priority_ordering_matches_spec() {
        assert!(MessagePriority::Critical > MessagePriority::High);
        assert!(MessagePriority::High > MessagePriority::Normal);
        assert!(MessagePriority::Normal > MessagePriority::Low);
        assert!(MessagePriority::High.retry_eligible());
        assert!(!MessagePriority::Normal.retry_eligible());
    }

    #[test]
    fn expiry_uses_created_at_plus_ttl() {
        let mut msg = Message::new_broadcast(identity("a"), serde_json::json!({}), MessagePriority::Low, TtlSeconds::try_new(0).unwrap());
        msg.metadata.created_at = MessageTimestamp::new(0);
        assert!(msg.is_expired());
    }
}
