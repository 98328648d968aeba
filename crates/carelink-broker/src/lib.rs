//! # carelink-broker
//!
//! Topic-exchange messaging for the provider service.
//!
//! - [`topology`]: exchange/queue/binding declarations and routing-key matching
//! - [`broker`]: the [`MessageBroker`] trait publishers and consumers depend on
//! - [`memory`]: [`InMemoryBroker`], an in-process implementation
//! - [`consumer`]: handler trait and per-queue dispatcher
//!
//! Delivery is at-least-once and unordered from the handler's point of view;
//! handlers must be idempotent.

pub mod broker;
pub mod consumer;
mod error;
pub mod memory;
pub mod message;
pub mod topology;

pub use broker::{MessageBroker, QueueReceiver, publish_json};
pub use consumer::{ConsumerDispatcher, HandlerError, MessageHandler, spawn_consumer};
pub use error::BrokerError;
pub use memory::InMemoryBroker;
pub use message::{Delivery, encode};
pub use topology::{
    Binding, ExchangeDeclaration, ExchangeKind, QueueDeclaration, QueueNames, RoutingKeys,
    Topology, TopologyConfig, topic_matches,
};

/// Type alias for a shareable broker.
pub type DynBroker = std::sync::Arc<dyn MessageBroker>;
