//! Messages as they travel through the broker.

use carelink_core::{Timestamp, generate_message_id};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::BrokerError;

/// A message routed to a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message_id: String,
    pub exchange: String,
    pub routing_key: String,
    pub published_at: Timestamp,
    /// JSON body exactly as published
    pub body: Value,
}

impl Delivery {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>, body: Value) -> Self {
        Self {
            message_id: generate_message_id(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            published_at: Timestamp::now(),
            body,
        }
    }

    /// Decode the body into a typed payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, BrokerError> {
        Ok(T::deserialize(&self.body)?)
    }
}

/// Encode a typed payload into a message body.
pub fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<Value, BrokerError> {
    Ok(serde_json::to_value(payload)?)
}
