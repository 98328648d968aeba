//! Broker abstraction.
//!
//! Publishers and consumers only see [`MessageBroker`]; the in-process
//! [`InMemoryBroker`](crate::InMemoryBroker) is one implementation, a network
//! broker client is another.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::BrokerError;
use crate::message::{Delivery, encode};
use crate::topology::Topology;

/// Receiving end of a queue.
pub type QueueReceiver = mpsc::Receiver<Delivery>;

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Declare exchanges, queues and bindings. Redeclaring an identical entity
    /// is a no-op.
    async fn declare(&self, topology: &Topology) -> Result<(), BrokerError>;

    /// Publish a JSON body to an exchange.
    ///
    /// Returns the number of queues the message was routed to. A routing key
    /// with no matching binding yields `Ok(0)`: the message is dropped.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Value,
    ) -> Result<usize, BrokerError>;

    /// Attach the single consumer of a queue.
    async fn consume(&self, queue: &str) -> Result<QueueReceiver, BrokerError>;
}

/// Encode `payload` as JSON and publish it.
pub async fn publish_json<T>(
    broker: &dyn MessageBroker,
    exchange: &str,
    routing_key: &str,
    payload: &T,
) -> Result<usize, BrokerError>
where
    T: Serialize + ?Sized,
{
    let body = encode(payload)?;
    broker.publish(exchange, routing_key, body).await
}
