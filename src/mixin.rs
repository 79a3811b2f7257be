//! Communication mixin (C9): the thin agent-side facade an agent uses to
//! talk to the [`Broker`] instead of touching its registries and queue
//! directly (grounding: `agent_communication_mixin.py`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::broker::domain_types::{AgentId, TtlSeconds, Topic};
use crate::broker::error::BrokerError;
use crate::broker::handler::Handler;
use crate::broker::message::{AgentIdentity, Message, MessagePriority, MessageType, Payload};
use crate::broker::Broker;

type HandlerTable = Arc<RwLock<HashMap<MessageType, Handler>>>;

fn default_handlers() -> HashMap<MessageType, Handler> {
    let mut handlers: HashMap<MessageType, Handler> = HashMap::new();

    handlers.insert(
        MessageType::Request,
        Handler::sync(|message| {
            info!(message_id = %message.metadata.message_id, "default REQUEST handler acknowledging");
            Some(serde_json::json!({
                "status": "acknowledged",
                "message": "request received by default handler",
                "message_id": message.metadata.message_id.to_string(),
            }))
        }),
    );
    handlers.insert(
        MessageType::Response,
        Handler::sync(|message| {
            debug!(message_id = %message.metadata.message_id, "default RESPONSE handler: no-op");
            None
        }),
    );
    handlers.insert(
        MessageType::Event,
        Handler::sync(|message| {
            debug!(payload = %message.payload, "default EVENT handler: no-op");
            None
        }),
    );
    handlers.insert(
        MessageType::Broadcast,
        Handler::sync(|message| {
            debug!(sender = %message.sender.agent_id, "default BROADCAST handler: no-op");
            None
        }),
    );
    handlers.insert(
        MessageType::ContextShare,
        Handler::sync(|message| {
            let context_type = message.payload.get("context_type").cloned().unwrap_or_default();
            debug!(%context_type, "default CONTEXT_SHARE handler: no-op");
            None
        }),
    );
    handlers.insert(
        MessageType::StatusUpdate,
        Handler::sync(|message| {
            debug!(sender = %message.sender.agent_id, "default STATUS_UPDATE handler: no-op");
            None
        }),
    );
    handlers.insert(
        MessageType::Error,
        Handler::sync(|message| {
            error!(sender = %message.sender.agent_id, payload = %message.payload, "default ERROR handler: no-op");
            None
        }),
    );

    handlers
}

/// Dispatches an incoming message to its registered per-type handler,
/// catching a handler panic and converting it into the structured
/// `{"error": ..., "status": "failed"}` payload the original returns rather
/// than propagating (§4.9).
async fn dispatch(handlers: &HandlerTable, message: Message) -> Option<Payload> {
    let handler = {
        let table = handlers.read().await;
        table.get(&message.message_type).cloned()
    };

    let Some(handler) = handler else {
        warn!(message_type = ?message.message_type, "no handler registered for message type");
        return None;
    };

    match tokio::spawn(async move { handler.call(message).await }).await {
        Ok(result) => result,
        Err(join_error) => Some(serde_json::json!({
            "error": join_error.to_string(),
            "status": "failed",
        })),
    }
}

/// Agent-facing facade over the broker. Owns the agent's identity and a
/// shared broker handle; registers with the broker on construction and
/// unregisters on [`Self::cleanup`].
pub struct CommunicationMixin {
    identity: AgentIdentity,
    broker: Arc<Broker>,
    handlers: HandlerTable,
}

impl CommunicationMixin {
    /// Builds the facade and registers `identity` with `broker`,
    /// installing the default per-type handler table.
    #[must_use]
    pub fn new(broker: Arc<Broker>, identity: AgentIdentity) -> Self {
        let handlers: HandlerTable = Arc::new(RwLock::new(default_handlers()));

        let dispatch_handlers = handlers.clone();
        let on_message = Handler::asynchronous(move |message| {
            let handlers = dispatch_handlers.clone();
            Box::pin(async move { dispatch(&handlers, message).await })
        });
        broker.register_agent(identity.clone(), on_message);

        Self { identity, broker, handlers }
    }

    /// Overrides (or installs) the handler for `message_type`, the
    /// equivalent of a subclass overriding one of the default handler
    /// methods in the original.
    pub async fn set_handler(&self, message_type: MessageType, handler: Handler) {
        self.handlers.write().await.insert(message_type, handler);
    }

    /// This agent's identity.
    #[must_use]
    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Whether the broker still has this agent's identity registered.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.broker.lookup_agent(&self.identity.agent_id).is_some()
    }

    /// Sends a message of `message_type` to `recipients` with default
    /// NORMAL priority and a 300s TTL.
    pub async fn send_message(
        &self,
        recipients: Vec<AgentId>,
        message_type: MessageType,
        payload: Payload,
        priority: MessagePriority,
        ttl_seconds: TtlSeconds,
    ) -> bool {
        let message = Message::new(self.identity.clone(), recipients, message_type, payload, priority, ttl_seconds);
        self.broker.send_message(message).await
    }

    /// Sends a REQUEST to `recipient` and awaits its RESPONSE payload
    /// within `timeout`. Returns `None` on timeout or enqueue failure.
    ///
    /// # Errors
    /// Never actually errors in practice — `send_request`'s only error
    /// kind requires a non-REQUEST message, which this method cannot
    /// construct — but the `Result` is preserved so a future caller
    /// supplying a raw `Message` through [`Broker::send_request`] directly
    /// sees that invariant enforced.
    pub async fn send_request(
        &self,
        recipient: AgentId,
        payload: Payload,
        timeout: Duration,
        priority: MessagePriority,
    ) -> Result<Option<Payload>, BrokerError> {
        let request = Message::new_request(self.identity.clone(), vec![recipient], payload, priority, TtlSeconds::default());
        let response = self.broker.send_request(request, timeout).await?;
        Ok(response.map(|message| message.payload))
    }

    /// Responds to a previously-received REQUEST.
    pub async fn send_response(&self, request_message: &Message, payload: Payload) -> bool {
        let response = request_message.create_response(self.identity.clone(), payload);
        self.broker.send_message(response).await
    }

    /// Publishes an EVENT to every current subscriber of `topic`.
    pub async fn publish_event(&self, topic: Topic, payload: Payload, priority: MessagePriority) -> bool {
        self.broker.publish_event(topic, self.identity.clone(), payload, priority).await
    }

    /// Broadcasts to every registered agent. Defaults to HIGH priority,
    /// matching the original's `send_broadcast` default (not NORMAL).
    pub async fn send_broadcast(&self, payload: Payload, priority: MessagePriority) -> bool {
        let message = Message::new_broadcast(self.identity.clone(), payload, priority, TtlSeconds::default());
        self.broker.send_message(message).await
    }

    /// Shares RAG/analysis context with `recipient`.
    pub async fn share_context(&self, recipient: AgentId, context_data: Payload, context_type: &str) -> bool {
        let message = Message::new_context_share(
            self.identity.clone(),
            recipient,
            context_type,
            context_data,
            MessagePriority::Normal,
        );
        self.broker.send_message(message).await
    }

    /// Subscribes this agent to `topic`.
    ///
    /// # Errors
    /// Returns [`BrokerError::UnknownAgent`] if this agent is no longer
    /// registered (e.g. called after [`Self::cleanup`]).
    pub fn subscribe(&self, topic: Topic) -> Result<(), BrokerError> {
        self.broker.subscribe(&self.identity.agent_id, topic)
    }

    /// Unsubscribes this agent from `topic`. Idempotent.
    pub fn unsubscribe(&self, topic: &Topic) {
        self.broker.unsubscribe(&self.identity.agent_id, topic);
    }

    /// Unregisters this agent from the broker.
    pub fn cleanup(&self) {
        self.broker.unregister_agent(&self.identity.agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::config::BrokerConfig;
    use crate::broker::domain_types::{AgentName, AgentType, QueueCapacity, WorkerCount};
    use crate::time_provider::test_time_provider;
    use std::collections::HashSet;

    fn identity(id: &str) -> AgentIdentity {
        AgentIdentity::new(
            AgentId::try_new(id).unwrap(),
            AgentType::try_new("t").unwrap(),
            AgentName::try_new(id).unwrap(),
            HashSet::new(),
        )
    }

    fn test_broker() -> Arc<Broker> {
        let mut config = BrokerConfig::testing();
        config.num_workers = WorkerCount::try_new(1).unwrap();
        config.max_queue_size = QueueCapacity::try_new(10).unwrap();
        Arc::new(Broker::new(config, test_time_provider()))
    }

    #[tokio::test]
    async fn construction_registers_with_the_broker() {
        let broker = test_broker();
        let mixin = CommunicationMixin::new(broker.clone(), identity("a"));
        assert!(mixin.is_registered());
    }

    #[tokio::test]
    async fn cleanup_unregisters_the_agent() {
        let broker = test_broker();
        let mixin = CommunicationMixin::new(broker.clone(), identity("a"));
        mixin.cleanup();
        assert!(!mixin.is_registered());
    }

    #[tokio::test]
    async fn default_request_handler_acknowledges() {
        let broker = test_broker();
        let responder = CommunicationMixin::new(broker.clone(), identity("b"));
        let _requester = CommunicationMixin::new(broker.clone(), identity("a"));
        broker.start().await;

        let payload = responder
            .send_response(
                &Message::new_request(
                    identity("a"),
                    vec![AgentId::try_new("b").unwrap()],
                    serde_json::json!({}),
                    MessagePriority::Normal,
                    TtlSeconds::default(),
                ),
                serde_json::json!({"ok": true}),
            )
            .await;
        assert!(payload);
        broker.stop().await;
    }

    #[tokio::test]
    async fn send_broadcast_defaults_document_high_priority_usage() {
        let broker = test_broker();
        let mixin = CommunicationMixin::new(broker.clone(), identity("a"));
        broker.start().await;
        assert!(mixin.send_broadcast(serde_json::json!({"announce": "x"}), MessagePriority::High).await);
        broker.stop().await;
    }

    #[tokio::test]
    async fn overridden_handler_replaces_the_default() {
        let broker = test_broker();
        let mixin = CommunicationMixin::new(broker.clone(), identity("a"));
        mixin
            .set_handler(MessageType::Event, Handler::sync(|_msg| Some(serde_json::json!({"custom": true}))))
            .await;
        let handlers = mixin.handlers.read().await;
        assert!(handlers.contains_key(&MessageType::Event));
    }
}
