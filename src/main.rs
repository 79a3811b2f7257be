//! Demo binary wiring up a small broker with two agents exchanging a request.

use agent_broker::broker::domain_types::{AgentId, AgentName, AgentType};
use agent_broker::time_provider::production_time_provider;
use agent_broker::{AgentIdentity, BrokerConfig, CommunicationMixin, MessagePriority};
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn identity(id: &str) -> AgentIdentity {
    AgentIdentity::new(
        AgentId::try_new(id).expect("valid agent id"),
        AgentType::try_new("demo").expect("valid agent type"),
        AgentName::try_new(id).expect("valid agent name"),
        HashSet::new(),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("agent_broker=info".parse()?),
        )
        .init();

    info!("starting agent broker demo");

    let broker = Arc::new(agent_broker::Broker::new(
        BrokerConfig::development(),
        production_time_provider(),
    ));
    broker.start().await;

    let responder = CommunicationMixin::new(broker.clone(), identity("echo-agent"));
    responder
        .set_handler(
            agent_broker::MessageType::Request,
            agent_broker::Handler::sync(|message| Some(serde_json::json!({"echo": message.payload}))),
        )
        .await;

    let requester = CommunicationMixin::new(broker.clone(), identity("demo-client"));
    let response = requester
        .send_request(
            AgentId::try_new("echo-agent")?,
            serde_json::json!({"greeting": "hello"}),
            Duration::from_secs(2),
            MessagePriority::Normal,
        )
        .await?;
    info!(?response, "received response from echo-agent");

    let stats = broker.stats().await;
    info!(
        sent = stats.messages_sent,
        delivered = stats.messages_delivered,
        "broker stats after demo exchange"
    );

    requester.cleanup();
    responder.cleanup();
    broker.stop().await;

    info!("agent broker demo shutting down");
    Ok(())
}
