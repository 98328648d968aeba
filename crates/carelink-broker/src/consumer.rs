//! Queue consumers.
//!
//! A [`ConsumerDispatcher`] drains one queue and hands every delivery to a
//! [`MessageHandler`] in its own task. Handler outcomes never flow back to the
//! broker: success, error, panic and timeout all end with the delivery being
//! acknowledged and dropped, so a poison message cannot loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{MessageBroker, QueueReceiver};
use crate::error::BrokerError;
use crate::message::Delivery;

/// Default upper bound for one handler invocation.
const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for handler operations.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Payload could not be decoded or failed validation.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Handler gave up on the message for a domain reason.
    #[error("Message rejected: {0}")]
    Rejected(String),

    /// Local persistence failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Generic error with source.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        HandlerError::Malformed(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        HandlerError::Rejected(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        HandlerError::Storage(msg.into())
    }
}

impl From<BrokerError> for HandlerError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Codec(e) => HandlerError::Malformed(e.to_string()),
            other => HandlerError::Other(other.into()),
        }
    }
}

/// Asynchronous handler bound to one queue.
///
/// Handlers may run concurrently for different deliveries of the same queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Unique name for this handler (for logging).
    fn name(&self) -> &str;

    /// Handle one delivery.
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// Drains a queue into a handler.
pub struct ConsumerDispatcher {
    queue: String,
    handler: Arc<dyn MessageHandler>,
    timeout: Duration,
}

impl ConsumerDispatcher {
    pub fn new(queue: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            queue: queue.into(),
            handler,
            timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run until the queue is closed.
    pub async fn run(self, mut receiver: QueueReceiver) {
        info!(queue = %self.queue, handler = %self.handler.name(), "Starting consumer");

        let mut in_flight = Vec::new();
        while let Some(delivery) = receiver.recv().await {
            in_flight.retain(|task: &JoinHandle<()>| !task.is_finished());
            in_flight.push(self.dispatch(delivery));
        }

        for task in in_flight {
            let _ = task.await;
        }
        info!(queue = %self.queue, "Queue closed, consumer stopped");
    }

    /// Handle one delivery in an isolated task.
    pub fn dispatch(&self, delivery: Delivery) -> JoinHandle<()> {
        let handler = self.handler.clone();
        let timeout = self.timeout;
        let queue = self.queue.clone();

        tokio::spawn(async move {
            let handler_name = handler.name().to_string();
            let result = tokio::time::timeout(timeout, async {
                AssertUnwindSafe(handler.handle(&delivery))
                    .catch_unwind()
                    .await
            })
            .await;

            match result {
                Ok(Ok(Ok(()))) => {
                    debug!(
                        queue = %queue,
                        handler = %handler_name,
                        message_id = %delivery.message_id,
                        "Delivery handled"
                    );
                }
                Ok(Ok(Err(e))) => {
                    warn!(
                        queue = %queue,
                        handler = %handler_name,
                        message_id = %delivery.message_id,
                        error = %e,
                        "Delivery failed, acknowledged and dropped"
                    );
                }
                Ok(Err(panic)) => {
                    let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "Unknown panic".to_string()
                    };
                    error!(
                        queue = %queue,
                        handler = %handler_name,
                        message_id = %delivery.message_id,
                        panic = %panic_msg,
                        "Handler panicked, delivery dropped"
                    );
                }
                Err(_) => {
                    error!(
                        queue = %queue,
                        handler = %handler_name,
                        message_id = %delivery.message_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Handler timed out, delivery dropped"
                    );
                }
            }
        })
    }
}

impl std::fmt::Debug for ConsumerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerDispatcher")
            .field("queue", &self.queue)
            .field("handler", &self.handler.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Attach `handler` to `queue` and run it as a background task.
pub async fn spawn_consumer(
    broker: &dyn MessageBroker,
    queue: &str,
    handler: Arc<dyn MessageHandler>,
    timeout: Duration,
) -> Result<JoinHandle<()>, BrokerError> {
    let receiver = broker.consume(queue).await?;
    let dispatcher = ConsumerDispatcher::new(queue, handler).with_timeout(timeout);
    Ok(tokio::spawn(dispatcher.run(receiver)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use crate::topology::Topology;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        handled: AtomicU32,
    }

    #[async_trait]
    impl MessageHandler for CountingHandler {
        fn name(&self) -> &str {
            "counting"
        }

        async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
            match delivery.body["kind"].as_str() {
                Some("panic") => panic!("boom"),
                Some("fail") => Err(HandlerError::rejected("asked to fail")),
                Some("slow") => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
                _ => {
                    self.handled.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        }
    }

    fn delivery(kind: &str) -> Delivery {
        Delivery::new("events", "a.b", json!({ "kind": kind }))
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let handler = Arc::new(CountingHandler {
            handled: AtomicU32::new(0),
        });
        let dispatcher = ConsumerDispatcher::new("q", handler.clone());
        dispatcher.dispatch(delivery("ok")).await.unwrap();
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_contained() {
        let handler = Arc::new(CountingHandler {
            handled: AtomicU32::new(0),
        });
        let dispatcher = ConsumerDispatcher::new("q", handler.clone());

        assert!(dispatcher.dispatch(delivery("fail")).await.is_ok());
        assert!(dispatcher.dispatch(delivery("panic")).await.is_ok());
        dispatcher.dispatch(delivery("ok")).await.unwrap();
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_is_bounded_by_timeout() {
        let handler = Arc::new(CountingHandler {
            handled: AtomicU32::new(0),
        });
        let dispatcher =
            ConsumerDispatcher::new("q", handler.clone()).with_timeout(Duration::from_millis(50));
        let started = tokio::time::Instant::now();
        dispatcher.dispatch(delivery("slow")).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_spawned_consumer_drains_queue() {
        let broker = InMemoryBroker::new();
        broker
            .declare(
                &Topology::new()
                    .topic_exchange("events")
                    .bound_queue("q", "events", "a.*"),
            )
            .await
            .unwrap();
        let handler = Arc::new(CountingHandler {
            handled: AtomicU32::new(0),
        });
        spawn_consumer(&broker, "q", handler.clone(), Duration::from_secs(1))
            .await
            .unwrap();

        for _ in 0..3 {
            broker.publish("events", "a.b", json!({"kind": "ok"})).await.unwrap();
        }
        for _ in 0..100 {
            if handler.handled.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handler.handled.load(Ordering::SeqCst), 3);
    }
}
