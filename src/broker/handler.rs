//! Explicit handler interface.
//!
//! The original source detects at call time whether a handler is a
//! coroutine (`asyncio.iscoroutinefunction`); Rust has no such runtime
//! probe, so the dispatcher is handed an explicit tagged-variant type
//! instead (§9 Design Notes).

use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

use super::message::{Message, Payload};

/// A handler supplied by an agent and invoked by the broker to process a
/// delivered message.
///
/// For a REQUEST, returning `Some(payload)` causes the delivery engine to
/// synthesise and re-enqueue a RESPONSE (§4.6 step 3c); returning `None`
/// does not. For any other message type the return value is ignored.
#[derive(Clone)]
pub enum Handler {
    /// A plain synchronous callback.
    Sync(Arc<dyn Fn(Message) -> Option<Payload> + Send + Sync>),
    /// A callback returning a boxed future, for handlers that need to await.
    Async(Arc<dyn Fn(Message) -> BoxFuture<'static, Option<Payload>> + Send + Sync>),
}

impl Handler {
    /// Wraps a synchronous closure.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Message) -> Option<Payload> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wraps an asynchronous closure.
    pub fn asynchronous<F>(f: F) -> Self
    where
        F: Fn(Message) -> BoxFuture<'static, Option<Payload>> + Send + Sync + 'static,
    {
        Self::Async(Arc::new(f))
    }

    /// Invokes the handler, awaiting completion uniformly regardless of
    /// which variant it is.
    pub async fn call(&self, message: Message) -> Option<Payload> {
        match self {
            Self::Sync(f) => f(message),
            Self::Async(f) => f(message).await,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Sync(_) => "Sync",
            Self::Async(_) => "Async",
        };
        f.debug_tuple("Handler").field(&kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::broker::domain_types::{AgentId, AgentName, AgentType};
    use crate::broker::message::{AgentIdentity, MessagePriority};
    use crate::broker::domain_types::TtlSeconds;

    fn sample_message() -> Message {
        let identity = AgentIdentity::new(
            AgentId::try_new("a").unwrap(),
            AgentType::try_new("t").unwrap(),
            AgentName::try_new("A").unwrap(),
            HashSet::new(),
        );
        Message::new_broadcast(identity, serde_json::json!({}), MessagePriority::Normal, TtlSeconds::default())
    }

    #[tokio::test]
    async fn sync_handler_runs_without_suspending() {
        let handler = Handler::sync(|_msg| Some(serde_json::json!({"ok": true})));
        let result = handler.call(sample_message()).await;
        assert_eq!(result, Some(serde_json::json!({"ok": true})));
    }

    #[tokio::test]
    async fn async_handler_awaits_its_future() {
        let handler = Handler::asynchronous(|_msg| {
            Box::pin(async {
                tokio::task::yield_now().await;
                Some(serde_json::json!({"ok": true}))
            })
        });
        let result = handler.call(sample_message()).await;
        assert_eq!(result, Some(serde_json::json!({"ok": true})));
    }
}
