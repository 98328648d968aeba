//! Broker error types.

/// Errors raised by broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Publish or bind against an exchange that was never declared.
    #[error("Exchange not found: {exchange}")]
    ExchangeNotFound {
        /// Name of the missing exchange.
        exchange: String,
    },

    /// Consume or bind against a queue that was never declared.
    #[error("Queue not found: {queue}")]
    QueueNotFound {
        /// Name of the missing queue.
        queue: String,
    },

    /// The queue already has a consumer attached.
    #[error("Queue {queue} already has a consumer")]
    ConsumerAttached {
        /// Name of the queue.
        queue: String,
    },

    /// A redeclaration conflicts with the existing declaration.
    #[error("Declaration conflict for {name}: {message}")]
    DeclarationConflict {
        /// Name of the exchange or queue.
        name: String,
        /// What differs.
        message: String,
    },

    /// The broker cannot be reached.
    #[error("Broker unavailable: {message}")]
    Unavailable {
        /// Description of the outage.
        message: String,
    },

    /// Payload could not be encoded or decoded.
    #[error("Payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl BrokerError {
    /// Creates a new `ExchangeNotFound` error.
    #[must_use]
    pub fn exchange_not_found(exchange: impl Into<String>) -> Self {
        Self::ExchangeNotFound {
            exchange: exchange.into(),
        }
    }

    /// Creates a new `QueueNotFound` error.
    #[must_use]
    pub fn queue_not_found(queue: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue: queue.into(),
        }
    }

    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Returns `true` if the broker could not be reached.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
